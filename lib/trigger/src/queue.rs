//! Dispatch queues.
//!
//! Each trigger source owns one queue. Jobs run strictly one at a time in
//! arrival order on a single worker task. A failed or panicking job is
//! logged and the worker moves on to the next one. Jobs live only in memory.

use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rootcause::Report;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use taskloom_core::{JobId, WorkspaceId};
use taskloom_engine::{ExecutionError, TriggerInput};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A queued workspace run.
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier, for logs.
    pub id: JobId,
    /// The workspace to run.
    pub workspace_id: WorkspaceId,
    /// Trigger source and payload.
    pub input: TriggerInput,
    /// When the job was created.
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job stamped with the current time.
    #[must_use]
    pub fn new(workspace_id: WorkspaceId, input: TriggerInput) -> Self {
        Self {
            id: JobId::new(),
            workspace_id,
            input,
            enqueued_at: Utc::now(),
        }
    }
}

/// Executes dequeued jobs.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Runs one job.
    ///
    /// # Errors
    ///
    /// Returns an error if the run could not be carried out. The queue logs
    /// it and continues.
    async fn process(&self, job: Job) -> Result<(), Report<ExecutionError>>;
}

#[derive(Debug, Default)]
struct QueueStats {
    pending: AtomicUsize,
    processed: AtomicU64,
}

/// Producer side of a dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    name: &'static str,
    sender: mpsc::UnboundedSender<Job>,
    stats: Arc<QueueStats>,
}

/// Consumer side of a dispatch queue, started with [`QueueWorker::spawn`].
#[derive(Debug)]
pub struct QueueWorker {
    name: &'static str,
    receiver: mpsc::UnboundedReceiver<Job>,
    stats: Arc<QueueStats>,
}

impl DispatchQueue {
    /// Creates a queue and its not-yet-started worker.
    #[must_use]
    pub fn channel(name: &'static str) -> (Self, QueueWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        (
            Self {
                name,
                sender,
                stats: Arc::clone(&stats),
            },
            QueueWorker {
                name,
                receiver,
                stats,
            },
        )
    }

    /// Appends `job` to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped.
    pub fn enqueue(&self, job: Job) -> Result<JobId, Report<QueueError>> {
        let job_id = job.id;
        let workspace_id = job.workspace_id.clone();
        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            self.stats.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed { queue: self.name }.into());
        }
        debug!(queue = self.name, %job_id, %workspace_id, "job enqueued");
        Ok(job_id)
    }

    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the number of jobs waiting to start.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs finished, successfully or not.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.stats.processed.load(Ordering::SeqCst)
    }
}

impl QueueWorker {
    /// Starts draining the queue into `processor`.
    ///
    /// The worker stops once every [`DispatchQueue`] handle is dropped and
    /// the remaining jobs are done.
    pub fn spawn(self, processor: Arc<dyn JobProcessor>) -> JoinHandle<()> {
        tokio::spawn(self.run(processor))
    }

    async fn run(mut self, processor: Arc<dyn JobProcessor>) {
        info!(queue = self.name, "dispatch queue started");
        while let Some(job) = self.receiver.recv().await {
            self.stats.pending.fetch_sub(1, Ordering::SeqCst);
            let job_id = job.id;
            let workspace_id = job.workspace_id.clone();
            debug!(queue = self.name, %job_id, %workspace_id, "job started");

            match AssertUnwindSafe(processor.process(job)).catch_unwind().await {
                Ok(Ok(())) => {
                    info!(queue = self.name, %job_id, %workspace_id, "job finished");
                }
                Ok(Err(report)) => {
                    error!(
                        queue = self.name,
                        %job_id,
                        %workspace_id,
                        error = %report.current_context(),
                        "job failed"
                    );
                }
                Err(panic) => {
                    error!(
                        queue = self.name,
                        %job_id,
                        %workspace_id,
                        panic = panic_message(panic.as_ref()),
                        "job panicked"
                    );
                }
            }
            self.stats.processed.fetch_add(1, Ordering::SeqCst);
        }
        info!(queue = self.name, "dispatch queue stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use taskloom_engine::TriggerSource;

    fn job(name: &str) -> Job {
        Job::new(
            WorkspaceId::new(name).expect("valid"),
            TriggerInput::new(TriggerSource::Scheduled),
        )
    }

    /// Records job order and the highest number of jobs running at once.
    struct Recorder {
        order: Mutex<Vec<String>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        follow_up: Mutex<Option<DispatchQueue>>,
        done: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl JobProcessor for Recorder {
        async fn process(&self, job: Job) -> Result<(), Report<ExecutionError>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let name = job.workspace_id.as_str().to_string();
            self.order.lock().expect("lock").push(name.clone());

            let follow_up = self.follow_up.lock().expect("lock").take();
            if let Some(queue) = follow_up {
                queue.enqueue(self::job("late")).expect("queue open");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            let _ = self.done.send(());
            match name.as_str() {
                "fail" => Err(ExecutionError::RunFailed {
                    workspace_id: job.workspace_id,
                    reason: "boom".to_string(),
                }
                .into()),
                "panic" => panic!("job exploded"),
                _ => Ok(()),
            }
        }
    }

    fn recorder(queue: Option<DispatchQueue>) -> (Arc<Recorder>, mpsc::UnboundedReceiver<()>) {
        let (done, finished) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            follow_up: Mutex::new(queue),
            done,
        });
        (recorder, finished)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_one_job_at_a_time_in_arrival_order() {
        let (queue, worker) = DispatchQueue::channel("test");
        let (recorder, mut finished) = recorder(Some(queue.clone()));
        worker.spawn(recorder.clone());

        for name in ["a", "b", "c"] {
            queue.enqueue(job(name)).expect("queue open");
        }
        for _ in 0..4 {
            finished.recv().await.expect("job finished");
        }
        tokio::task::yield_now().await;

        assert_eq!(
            recorder.order.lock().expect("lock").as_slice(),
            ["a", "b", "c", "late"]
        );
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_panics_do_not_stop_the_queue() {
        let (queue, worker) = DispatchQueue::channel("test");
        let (recorder, mut finished) = recorder(None);
        worker.spawn(recorder.clone());

        for name in ["fail", "panic", "ok"] {
            queue.enqueue(job(name)).expect("queue open");
        }
        for _ in 0..3 {
            finished.recv().await.expect("job finished");
        }
        while queue.processed() < 3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            recorder.order.lock().expect("lock").as_slice(),
            ["fail", "panic", "ok"]
        );
    }

    #[tokio::test]
    async fn enqueue_fails_once_worker_is_gone() {
        let (queue, worker) = DispatchQueue::channel("test");
        drop(worker);

        let err = queue.enqueue(job("a")).unwrap_err();
        assert_eq!(err.current_context(), &QueueError::Closed { queue: "test" });
        assert_eq!(queue.pending(), 0);
    }
}
