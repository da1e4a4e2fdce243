//! Cron service for scheduling background agent turns.
//!
//! Jobs live in a flat JSON array on disk and are rescheduled from it on
//! start. Each firing hands the job's message to a [`JobRunner`] (normally
//! the agent loop) under the session key `cron:<job id>`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{BusMessage, MessageBus};
use crate::error::{NanoError, Result};

/// Executions kept by [`CronService::recent_executions`].
const HISTORY_CAPACITY: usize = 100;

/// Bus channel used when a job's result is delivered.
pub const DELIVERY_CHANNEL: &str = "cron";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Executes a job's message. The agent loop implements this.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, session_key: &str, message: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Fixed period; the first run happens one period after scheduling.
    Every { every_ms: u64 },
    /// Minute expression: `N` or `*/N` fires every N minutes.
    Cron { expr: String },
}

impl CronSchedule {
    /// Firing period of the schedule.
    ///
    /// # Errors
    /// Returns `NanoError::Config` for a zero period or an unsupported
    /// expression.
    pub fn period(&self) -> Result<Duration> {
        match self {
            CronSchedule::Every { every_ms } if *every_ms > 0 => {
                Ok(Duration::from_millis(*every_ms))
            }
            CronSchedule::Every { .. } => {
                Err(NanoError::Config("every_ms must be greater than zero".into()))
            }
            CronSchedule::Cron { expr } => parse_minute_expr(expr)
                .map(|minutes| Duration::from_secs(minutes * 60))
                .ok_or_else(|| {
                    NanoError::Config(format!(
                        "Unsupported cron expression '{}': expected N or */N minutes",
                        expr
                    ))
                }),
        }
    }
}

fn parse_minute_expr(expr: &str) -> Option<u64> {
    let field = expr.trim();
    let digits = field.strip_prefix("*/").unwrap_or(field);
    match digits.parse::<u64>() {
        Ok(minutes) if minutes > 0 => Some(minutes),
        _ => None,
    }
}

fn default_enabled() -> bool {
    true
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule: CronSchedule,
    pub message: String,
    /// Publish the result on the bus after each run
    #[serde(default)]
    pub deliver: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: i64,
    #[serde(default)]
    pub last_run_at: Option<i64>,
}

/// Outcome of one firing.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedJob {
    pub job_id: String,
    pub job_name: String,
    pub message: String,
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
    pub executed_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CronStats {
    pub total_jobs: usize,
    /// Jobs with a live timer
    pub scheduled: usize,
    pub running: bool,
    pub store_path: String,
}

/// State shared with timer tasks.
struct Shared {
    store_path: PathBuf,
    runner: Arc<dyn JobRunner>,
    bus: Option<Arc<MessageBus>>,
    jobs: RwLock<Vec<CronJob>>,
    /// Whether `jobs` mirrors the store yet
    loaded: AtomicBool,
    history: Mutex<VecDeque<ExecutedJob>>,
}

impl Shared {
    /// Reads the store into `jobs` the first time it is needed, so a rewrite
    /// never drops jobs persisted by an earlier process.
    async fn ensure_loaded(&self, jobs: &mut Vec<CronJob>) -> Result<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            *jobs = load_store(&self.store_path).await?;
            self.loaded.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Persistent interval scheduler.
pub struct CronService {
    shared: Arc<Shared>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    running: AtomicBool,
}

impl CronService {
    pub fn new(store_path: PathBuf, runner: Arc<dyn JobRunner>) -> Self {
        Self::build(store_path, runner, None)
    }

    /// Also deliver results of `deliver` jobs as outbound bus messages.
    pub fn with_bus(self, bus: Arc<MessageBus>) -> Self {
        Self::build(
            self.shared.store_path.clone(),
            Arc::clone(&self.shared.runner),
            Some(bus),
        )
    }

    fn build(store_path: PathBuf, runner: Arc<dyn JobRunner>, bus: Option<Arc<MessageBus>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store_path,
                runner,
                bus,
                jobs: RwLock::new(Vec::new()),
                loaded: AtomicBool::new(false),
                history: Mutex::new(VecDeque::new()),
            }),
            timers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Loads the store and schedules every enabled job. Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let loaded = match load_store(&self.shared.store_path).await {
            Ok(jobs) => jobs,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        for job in loaded.iter().filter(|j| j.enabled) {
            if let Err(e) = self.schedule(job) {
                warn!(job = %job.name, error = %e, "Skipping invalid cron job");
            }
        }
        info!(jobs = loaded.len(), "Cron service started");
        *self.shared.jobs.write().await = loaded;
        self.shared.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Cancels all timers. Runs already in progress finish on their own.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("Cron service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Adds a job, replacing any job with the same name, and persists the
    /// store.
    ///
    /// # Errors
    /// Returns `NanoError::Config` for an invalid schedule, or an I/O error
    /// if the store cannot be written.
    pub async fn add_job(
        &self,
        name: &str,
        schedule: CronSchedule,
        message: &str,
        deliver: bool,
    ) -> Result<CronJob> {
        schedule.period()?;
        let job = CronJob {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            schedule,
            message: message.to_string(),
            deliver,
            enabled: true,
            created_at: now_ms(),
            last_run_at: None,
        };

        {
            let mut jobs = self.shared.jobs.write().await;
            self.shared.ensure_loaded(&mut jobs).await?;
            jobs.retain(|j| j.name != name);
            jobs.push(job.clone());
            save_store(&self.shared.store_path, &jobs).await?;
        }

        self.cancel_timer(name);
        if self.is_running() {
            self.schedule(&job)?;
        }
        info!(job = %name, "Cron job added");
        Ok(job)
    }

    /// Removes a job by name. Returns whether it existed.
    pub async fn remove_job(&self, name: &str) -> Result<bool> {
        self.cancel_timer(name);
        let mut jobs = self.shared.jobs.write().await;
        self.shared.ensure_loaded(&mut jobs).await?;
        let before = jobs.len();
        jobs.retain(|j| j.name != name);
        let removed = jobs.len() != before;
        if removed {
            save_store(&self.shared.store_path, &jobs).await?;
            info!(job = %name, "Cron job removed");
        }
        Ok(removed)
    }

    /// Known jobs in insertion order. The store is read by `start`,
    /// [`CronService::load_jobs`] or the first add/remove/run.
    pub async fn jobs(&self) -> Vec<CronJob> {
        self.shared.jobs.read().await.clone()
    }

    /// Reads the store into memory without scheduling anything.
    pub async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        let loaded = load_store(&self.shared.store_path).await?;
        *self.shared.jobs.write().await = loaded.clone();
        self.shared.loaded.store(true, Ordering::SeqCst);
        Ok(loaded)
    }

    /// Runs a job immediately, outside its schedule.
    pub async fn run_job(&self, name: &str) -> Result<ExecutedJob> {
        let job = {
            let mut jobs = self.shared.jobs.write().await;
            self.shared.ensure_loaded(&mut jobs).await?;
            jobs.iter()
                .find(|j| j.name == name)
                .cloned()
                .ok_or_else(|| NanoError::unknown("cron job", name))?
        };
        Ok(execute_job(&self.shared, &job).await)
    }

    /// Most recent executions, oldest first.
    pub fn recent_executions(&self) -> Vec<ExecutedJob> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> CronStats {
        CronStats {
            total_jobs: self.shared.jobs.read().await.len(),
            scheduled: self
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            running: self.is_running(),
            store_path: self.shared.store_path.display().to_string(),
        }
    }

    fn schedule(&self, job: &CronJob) -> Result<()> {
        let period = job.schedule.period()?;
        let shared = Arc::clone(&self.shared);
        let job = job.clone();
        let name = job.name.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                execute_job(&shared, &job).await;
            }
        });

        if let Some(previous) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handle)
        {
            previous.abort();
        }
        Ok(())
    }

    fn cancel_timer(&self, name: &str) {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
        {
            handle.abort();
        }
    }
}

impl Drop for CronService {
    fn drop(&mut self) {
        for (_, handle) in self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            handle.abort();
        }
    }
}

/// One firing: run, record, persist `last_run_at`, optionally deliver.
async fn execute_job(shared: &Shared, job: &CronJob) -> ExecutedJob {
    let started = Instant::now();
    let session_key = format!("cron:{}", job.id);
    let outcome = shared.runner.run(&session_key, &job.message).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (result, success) = match outcome {
        Ok(text) => {
            info!(job = %job.name, duration_ms, "Cron job executed");
            (text, true)
        }
        Err(e) => {
            error!(job = %job.name, error = %e, "Cron job failed");
            (e.to_string(), false)
        }
    };

    let executed = ExecutedJob {
        job_id: job.id.clone(),
        job_name: job.name.clone(),
        message: job.message.clone(),
        result,
        success,
        duration_ms,
        executed_at: now_ms(),
    };

    {
        let mut history = shared.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(executed.clone());
    }

    {
        let mut jobs = shared.jobs.write().await;
        if let Some(stored) = jobs.iter_mut().find(|j| j.id == job.id) {
            stored.last_run_at = Some(executed.executed_at);
            if let Err(e) = save_store(&shared.store_path, &jobs).await {
                warn!(error = %e, "Failed to persist cron store");
            }
        }
    }

    if job.deliver {
        if let Some(bus) = &shared.bus {
            let reply = BusMessage::outbound(DELIVERY_CHANNEL, "cron", &job.name, &executed.result);
            if let Err(e) = bus.publish_outbound(reply).await {
                error!(job = %job.name, error = %e, "Failed to deliver cron result");
            }
        }
    }

    executed
}

async fn load_store(path: &Path) -> Result<Vec<CronJob>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

async fn save_store(path: &Path, jobs: &[CronJob]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(jobs)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
