//! Message Bus Module
//!
//! This module provides the pub/sub transport that decouples producers
//! (channels, the CLI, cron) from consumers (the agent loop, UI streamers).
//! Handlers subscribe to named channels ("topics"); every message is fanned
//! out to all handlers subscribed to its channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  publish_inbound  ┌──────────────┐  dispatcher  ┌─────────────┐
//! │  Producer   │──────────────────>│ inbound FIFO │─────────────>│  handlers   │
//! │ (CLI, cron) │                   └──────────────┘   (fan-out)  │ per channel │
//! └─────────────┘                                                 └─────────────┘
//!                                                                        │
//! ┌─────────────┐                   ┌──────────────┐  dispatcher         │
//! │  Consumer   │<──────────────────│ outbound FIFO│<────────────────────┘
//! │  (channel)  │     (fan-out)     └──────────────┘  publish_outbound
//! └─────────────┘
//! ```
//!
//! Each handler invocation runs on its own spawned task. A handler that
//! returns an error or panics is logged and never affects its siblings or the
//! dispatcher. Delivery is at-most-once per handler; FIFO order is kept within
//! a queue.
//!
//! # Example
//!
//! ```
//! use nanoclaw::bus::{handler_fn, BusMessage, MessageBus};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!     bus.subscribe("agent", handler_fn(|msg: BusMessage| async move {
//!         println!("Received: {}", msg.content);
//!         Ok(())
//!     }))
//!     .await;
//!
//!     let msg = BusMessage::inbound("agent", "user123", "chat456", "Hello");
//!     let delivered = bus.publish(msg).await;
//!     assert_eq!(delivered, 1);
//! }
//! ```

pub mod events;
pub mod message;

pub use events::{Event, EventBus, EventHandler, EventStats, EventType};
pub use message::{BusMessage, MessageType};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{NanoError, Result};

/// Default dispatcher poll timeout
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capability invoked for every message published on a subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Errors are logged by the dispatcher.
    async fn handle(&self, msg: BusMessage) -> Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, msg: BusMessage) -> Result<()> {
        (self.0)(msg).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

/// Read-only snapshot of bus counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BusStats {
    /// Messages waiting in the inbound queue
    pub inbound_queue_size: usize,
    /// Messages waiting in the outbound queue
    pub outbound_queue_size: usize,
    /// Messages accepted since creation (queued and direct)
    pub total_messages: u64,
    /// Channels with at least one subscriber
    pub active_channels: usize,
}

type HandlerMap = HashMap<String, Vec<(SubscriptionId, Arc<dyn MessageHandler>)>>;

/// One of the two FIFO queues plus its depth gauge.
struct Queue {
    tx: mpsc::UnboundedSender<BusMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<BusMessage>>>,
    depth: Arc<AtomicUsize>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn push(&self, msg: BusMessage) -> Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(msg).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            NanoError::BusClosed
        })
    }
}

/// The central pub/sub message bus.
///
/// Handlers are stored per channel name. Queued messages are drained by two
/// dispatcher tasks started with [`MessageBus::start`]; [`MessageBus::publish`]
/// bypasses the queues and fans out immediately.
pub struct MessageBus {
    handlers: RwLock<HandlerMap>,
    next_subscription: AtomicU64,
    inbound: Queue,
    outbound: Queue,
    total_messages: AtomicU64,
    running: AtomicBool,
    generation: AtomicU64,
    poll_interval: Duration,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBus {
    /// Creates a stopped bus with the default 100ms poll interval.
    pub fn new() -> Arc<Self> {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Creates a stopped bus with a custom dispatcher poll interval.
    ///
    /// The interval bounds how long `stop()` takes to be observed.
    pub fn with_poll_interval(poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            inbound: Queue::new(),
            outbound: Queue::new(),
            total_messages: AtomicU64::new(0),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            poll_interval,
            dispatchers: Mutex::new(Vec::new()),
        })
    }

    /// Adds a handler to `channel`. All handlers of a channel receive every
    /// message published on it.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        debug!(channel = %channel, subscription = id.0, "Handler subscribed");
        id
    }

    /// Removes a subscription. Returns `false` if it was not present.
    pub async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(list) = handlers.get_mut(channel) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(channel);
        }
        removed
    }

    /// Returns true if `channel` has at least one handler.
    pub async fn has_subscribers(&self, channel: &str) -> bool {
        self.handlers
            .read()
            .await
            .get(channel)
            .is_some_and(|list| !list.is_empty())
    }

    /// Enqueues a message on the inbound queue.
    ///
    /// # Errors
    /// Returns `NanoError::BusClosed` if the queue can no longer accept messages.
    pub async fn publish_inbound(&self, msg: BusMessage) -> Result<()> {
        self.inbound.push(msg)?;
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueues a message on the outbound queue.
    pub async fn publish_outbound(&self, msg: BusMessage) -> Result<()> {
        self.outbound.push(msg)?;
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fans `msg` out to the current subscribers of its channel without
    /// queuing, waiting for every handler to finish.
    ///
    /// Returns the number of handlers the message was delivered to. Publishing
    /// to a channel with no subscribers is a no-op returning 0.
    pub async fn publish(&self, msg: BusMessage) -> usize {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        let tasks = self.spawn_handlers(msg).await;
        let count = tasks.len();
        futures::future::join_all(tasks).await;
        count
    }

    /// Starts the inbound and outbound dispatchers. Calling it on a running
    /// bus does nothing. Messages queued while stopped are delivered now.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Starting message bus");

        let mut dispatchers = self.dispatchers.lock().await;
        for (name, rx, depth) in [
            ("inbound", self.inbound.rx.clone(), self.inbound.depth.clone()),
            ("outbound", self.outbound.rx.clone(), self.outbound.depth.clone()),
        ] {
            let bus = Arc::clone(self);
            dispatchers.push(tokio::spawn(async move {
                bus.dispatch_loop(name, generation, rx, depth).await;
            }));
        }
    }

    /// Stops dispatching. Dispatchers exit within one poll interval; handler
    /// tasks already running are left to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping message bus");
        self.dispatchers.lock().await.clear();
    }

    /// Whether the dispatchers are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of queue depths and channel counts.
    pub async fn stats(&self) -> BusStats {
        let active_channels = self
            .handlers
            .read()
            .await
            .values()
            .filter(|list| !list.is_empty())
            .count();
        BusStats {
            inbound_queue_size: self.inbound.depth.load(Ordering::SeqCst),
            outbound_queue_size: self.outbound.depth.load(Ordering::SeqCst),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            active_channels,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn dispatch_loop(
        &self,
        name: &'static str,
        generation: u64,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<BusMessage>>>,
        depth: Arc<AtomicUsize>,
    ) {
        let mut rx = rx.lock().await;
        debug!(queue = name, "Dispatcher started");
        while self.is_current(generation) {
            match tokio::time::timeout(self.poll_interval, rx.recv()).await {
                Ok(Some(msg)) => {
                    depth.fetch_sub(1, Ordering::SeqCst);
                    // Handlers run detached; the dispatcher never waits on them.
                    drop(self.spawn_handlers(msg).await);
                }
                Ok(None) => {
                    info!(queue = name, "Bus queue closed");
                    break;
                }
                Err(_) => continue,
            }
        }
        debug!(queue = name, "Dispatcher stopped");
    }

    async fn spawn_handlers(&self, msg: BusMessage) -> Vec<JoinHandle<bool>> {
        let targets: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .await
            .get(&msg.channel)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(channel = %msg.channel, message_id = %msg.id, "No subscribers, dropping message");
            return Vec::new();
        }

        targets
            .into_iter()
            .map(|handler| tokio::spawn(invoke_handler(handler, msg.clone())))
            .collect()
    }
}

/// Runs one handler, logging its error or panic. Returns true on success.
async fn invoke_handler(handler: Arc<dyn MessageHandler>, msg: BusMessage) -> bool {
    let channel = msg.channel.clone();
    let message_id = msg.id.clone();
    match AssertUnwindSafe(handler.handle(msg)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(channel = %channel, message_id = %message_id, error = %e, "Bus handler failed");
            false
        }
        Err(_) => {
            error!(channel = %channel, message_id = %message_id, "Bus handler panicked");
            false
        }
    }
}
