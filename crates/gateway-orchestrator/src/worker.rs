//! Bounded-concurrency task executor (spec.md §4.A).
//!
//! Grounded in the teacher's `agent::event_bus::EventBus` task-tracking idiom
//! — a `tokio::task::JoinSet` owned behind a mutex so spawned work can be
//! drained on shutdown — generalized here from "fire and forget observer
//! notifications" into a full submit/await/batch/drain worker pool fed by a
//! bounded `mpsc` channel.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinSet;

pub type BoxedTask = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Ok(serde_json::Value),
    Failed(String),
    Panicked(String),
}

/// One unit of work submitted to the pool (spec.md §3 Task).
pub struct Task {
    pub id: String,
    pub timeout: Option<Duration>,
    pub work: BoxedTask,
}

impl Task {
    pub fn new(id: impl Into<String>, timeout: Option<Duration>, work: BoxedTask) -> Self {
        Self { id: id.into(), timeout, work }
    }
}

/// Terminal result for a submitted task; exactly one is produced per task
/// (spec.md §3 Task invariant).
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub started_at: Instant,
    pub finished_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool queue is full")]
    Rejected,
    #[error("worker pool is not running")]
    NotRunning,
    #[error("task cancelled before completion")]
    Cancelled,
}

#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    pub queued: AtomicU64,
    pub active: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn average_latency_ms(&self) -> f64 {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / completed as f64
    }
}

struct Envelope {
    task: Task,
    reply: Option<oneshot::Sender<TaskResult>>,
}

/// Fixed pool of N workers reading from one shared bounded channel
/// (spec.md §4.A "Algorithm").
pub struct WorkerPool {
    sender: mpsc::Sender<Envelope>,
    running: Arc<AtomicBool>,
    metrics: Arc<WorkerPoolMetrics>,
    workers: TokioMutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, queue_size: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_size);
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(WorkerPoolMetrics::default());
        let receiver = Arc::new(TokioMutex::new(receiver));

        let mut workers = JoinSet::new();
        for _ in 0..worker_count.max(1) {
            workers.spawn(worker_loop(receiver.clone(), running.clone(), metrics.clone()));
        }

        Arc::new(Self {
            sender,
            running,
            metrics,
            workers: TokioMutex::new(workers),
        })
    }

    pub fn metrics(&self) -> &WorkerPoolMetrics {
        &self.metrics
    }

    /// Non-blocking; fails immediately if the queue is full or the pool has
    /// been shut down (spec.md §4.A contract).
    pub fn submit(&self, task: Task) -> Result<(), WorkerPoolError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(WorkerPoolError::NotRunning);
        }
        self.metrics.queued.fetch_add(1, Ordering::Relaxed);
        self.sender
            .try_send(Envelope { task, reply: None })
            .map_err(|e| {
                self.metrics.queued.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => WorkerPoolError::Rejected,
                    mpsc::error::TrySendError::Closed(_) => WorkerPoolError::NotRunning,
                }
            })
    }

    /// Blocks until the task completes or `cancel` resolves first.
    pub async fn submit_wait(
        &self,
        task: Task,
        cancel: impl Future<Output = ()>,
    ) -> Result<TaskResult, WorkerPoolError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(WorkerPoolError::NotRunning);
        }
        let (tx, rx) = oneshot::channel();
        self.metrics.queued.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(Envelope { task, reply: Some(tx) })
            .await
            .map_err(|_| WorkerPoolError::NotRunning)?;

        tokio::select! {
            result = rx => result.map_err(|_| WorkerPoolError::Cancelled),
            _ = cancel => Err(WorkerPoolError::Cancelled),
        }
    }

    /// Submits every task and returns a channel that closes once all of them
    /// have produced a terminal result (spec.md §4.A `SubmitBatch`).
    pub fn submit_batch(self: &Arc<Self>, tasks: Vec<Task>) -> mpsc::Receiver<TaskResult> {
        let (tx, rx) = mpsc::channel(tasks.len().max(1));
        for task in tasks {
            let pool = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(result) = pool.submit_wait(task, std::future::pending()).await {
                    let _ = tx.send(result).await;
                }
            });
        }
        rx
    }

    /// Stops accepting new tasks, waits up to `grace` for in-flight work to
    /// finish, then aborts whatever remains (spec.md §4.A `Shutdown`).
    pub async fn shutdown(&self, grace: Duration) {
        self.running.store(false, Ordering::Release);
        let mut workers = self.workers.lock().await;
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                _ = &mut deadline => {
                    workers.abort_all();
                    break;
                }
            }
        }
    }
}

async fn worker_loop(
    receiver: Arc<TokioMutex<mpsc::Receiver<Envelope>>>,
    running: Arc<AtomicBool>,
    metrics: Arc<WorkerPoolMetrics>,
) {
    loop {
        let envelope = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(Envelope { task, reply }) = envelope else {
            break;
        };
        metrics.queued.fetch_sub(1, Ordering::Relaxed);
        metrics.active.fetch_add(1, Ordering::Relaxed);

        let started_at = Instant::now();
        let outcome = run_with_timeout_and_panic_recovery(task.work, task.timeout).await;
        let finished_at = Instant::now();

        metrics.active.fetch_sub(1, Ordering::Relaxed);
        match &outcome {
            TaskOutcome::Ok(_) => {
                metrics.completed.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Failed(_) | TaskOutcome::Panicked(_) => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics
            .total_latency_ms
            .fetch_add(finished_at.duration_since(started_at).as_millis() as u64, Ordering::Relaxed);

        if let Some(reply) = reply {
            let _ = reply.send(TaskResult { task_id: task.id, outcome, started_at, finished_at });
        }

        if !running.load(Ordering::Acquire) {
            // Keep draining what's already queued; the pool's `shutdown`
            // controls how long we're given to do so.
        }
    }
}

/// Runs `work`, recovering a panic into `TaskOutcome::Panicked` and applying
/// `timeout` if set (spec.md §4.A "On task panic, the worker recovers...").
async fn run_with_timeout_and_panic_recovery(work: BoxedTask, timeout: Option<Duration>) -> TaskOutcome {
    let guarded = AssertUnwindSafe(work).catch_unwind();
    let run = async {
        match guarded.await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&panic);
                TaskOutcome::Panicked(message)
            }
        }
    };

    match timeout {
        Some(d) => tokio::time::timeout(d, run)
            .await
            .unwrap_or_else(|_| TaskOutcome::Failed("task timed out".to_string())),
        None => run.await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}
