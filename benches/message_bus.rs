//! Message bus throughput benchmarks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use nanoclaw::bus::{handler_fn, BusMessage, MessageBus};
use nanoclaw::ContextManager;

fn counting_bus(rt: &Runtime, handlers: usize) -> (Arc<MessageBus>, Arc<AtomicU64>) {
    let bus = MessageBus::new();
    let seen = Arc::new(AtomicU64::new(0));
    rt.block_on(async {
        for _ in 0..handlers {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                "bench",
                handler_fn(move |_msg: BusMessage| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                }),
            )
            .await;
        }
    });
    (bus, seen)
}

fn bench_publish_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("publish_fanout");

    for handlers in [1usize, 4, 16] {
        let (bus, _seen) = counting_bus(&rt, handlers);
        group.throughput(Throughput::Elements(handlers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, _| {
            b.to_async(&rt).iter(|| {
                let bus = Arc::clone(&bus);
                async move {
                    bus.publish(BusMessage::inbound("bench", "u", "c", "hello"))
                        .await
                }
            });
        });
    }
    group.finish();
}

fn bench_queued_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (bus, seen) = counting_bus(&rt, 1);
    rt.block_on(bus.start());

    const BATCH: u64 = 1000;
    let mut group = c.benchmark_group("queued_dispatch");
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("inbound_1000", |b| {
        b.to_async(&rt).iter(|| {
            let bus = Arc::clone(&bus);
            let seen = Arc::clone(&seen);
            async move {
                let target = seen.load(Ordering::Relaxed) + BATCH;
                for _ in 0..BATCH {
                    bus.publish_inbound(BusMessage::inbound("bench", "u", "c", "hello"))
                        .await
                        .unwrap();
                }
                while seen.load(Ordering::Relaxed) < target {
                    tokio::task::yield_now().await;
                }
            }
        });
    });
    group.finish();
    rt.block_on(bus.stop());
}

fn bench_context_append(c: &mut Criterion) {
    let context = ContextManager::new(50, 8000);
    let text = "a".repeat(400);
    c.bench_function("context_append_pruned", |b| {
        b.iter(|| context.add_message("bench", nanoclaw::agent::Role::User, &text));
    });
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_queued_dispatch,
    bench_context_append
);
criterion_main!(benches);
