//! Index scheduler implementation
//!
//! Provides the public entry point: callers submit reindex requests, the
//! scheduler deduplicates them against the queue, and a single background
//! worker executes them in submission order.

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{QueuedTask, SubmitOutcome, TaskQueue};
use crate::task::{
    AnnotationDocumentId, ContentSnapshot, IndexTask, ProjectId, SourceDocumentId, UserName,
};
use crate::worker::{IndexWorker, TaskExecutor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total submissions, whatever their outcome
    pub tasks_submitted: u64,

    /// Submissions that became a new queue entry
    pub tasks_enqueued: u64,

    /// Submissions dropped because an equivalent task was queued
    pub tasks_deduplicated: u64,

    /// Submissions whose snapshot replaced that of a queued task
    pub tasks_coalesced: u64,

    /// Submissions dropped because the queue was full
    pub tasks_rejected: u64,

    /// Queued tasks removed by cancellation
    pub tasks_cancelled: u64,

    /// Tasks handed to the executor
    pub tasks_executed: u64,

    /// Executions that ended in a panic
    pub tasks_panicked: u64,

    /// Current queue size
    pub queue_size: usize,
}

/// Lock-free counters shared between the scheduler and its worker
#[derive(Debug, Default)]
pub(crate) struct SchedulerMetrics {
    pub(crate) tasks_submitted: AtomicU64,
    pub(crate) tasks_enqueued: AtomicU64,
    pub(crate) tasks_deduplicated: AtomicU64,
    pub(crate) tasks_coalesced: AtomicU64,
    pub(crate) tasks_rejected: AtomicU64,
    pub(crate) tasks_cancelled: AtomicU64,
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) tasks_panicked: AtomicU64,
}

/// Background reindex scheduler
///
/// Thread-safe: any number of threads may enqueue or cancel concurrently.
/// Equivalent requests are coalesced while they wait; distinct tasks run one
/// at a time in the order they first entered the queue.
///
/// The worker is started and stopped explicitly. Dropping the scheduler stops
/// the worker and discards whatever is still queued.
///
/// # Example
///
/// ```
/// use annotation_index_scheduler::{
///     AnnotationDocumentId, CancellationToken, ContentSnapshot, IndexScheduler, IndexTask,
///     ProjectId, SchedulerConfig, UserName,
/// };
/// use std::sync::Arc;
///
/// let scheduler = IndexScheduler::new(SchedulerConfig::default()).unwrap();
///
/// scheduler
///     .start(Arc::new(|task: IndexTask, _token: &CancellationToken| {
///         println!("indexing {}", task);
///     }))
///     .unwrap();
///
/// // Called from a document save handler
/// scheduler.enqueue_annotation_document(
///     ProjectId(1),
///     AnnotationDocumentId(42),
///     UserName::from("alice"),
///     ContentSnapshot::new(7, "annotated text"),
/// );
///
/// // The user's session ended; their pending work is no longer needed
/// scheduler.cancel_all_for_user(&UserName::from("alice"));
///
/// scheduler.stop();
/// ```
pub struct IndexScheduler {
    config: SchedulerConfig,
    queue: Arc<TaskQueue>,
    metrics: Arc<SchedulerMetrics>,
    worker: Mutex<Option<IndexWorker>>,
}

impl IndexScheduler {
    /// Create a scheduler with an empty queue. The worker is not started.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Config`] if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;

        Ok(Self {
            queue: Arc::new(TaskQueue::new(config.queue_capacity)),
            metrics: Arc::new(SchedulerMetrics::default()),
            worker: Mutex::new(None),
            config,
        })
    }

    /// Spawn the background worker
    ///
    /// Tasks already queued are picked up immediately.
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyRunning`] while a worker is running,
    /// including one that has been asked to stop but is still finishing its
    /// current task. Returns [`SchedulerError::WorkerSpawn`] if the thread
    /// cannot be created.
    pub fn start(&self, executor: TaskExecutor) -> SchedulerResult<()> {
        let mut worker = self.lock_worker();
        if let Some(previous) = worker.take() {
            if previous.is_alive() {
                *worker = Some(previous);
                return Err(SchedulerError::AlreadyRunning);
            }
            // Already out of its loop, only the handle is left to reap
            previous.shutdown();
        }

        *worker = Some(IndexWorker::spawn(
            self.queue.clone(),
            executor,
            self.metrics.clone(),
            &self.config,
        )?);
        Ok(())
    }

    /// Stop the background worker
    ///
    /// Signals the worker, then waits for the task in flight (if any) to
    /// return. No task is started after this call returns. Queued tasks stay
    /// queued and run if the scheduler is started again. No-op if the worker
    /// is not running.
    ///
    /// Called from inside the executor, this only signals the worker; the
    /// scheduler keeps reporting it as running until the current task returns.
    pub fn stop(&self) {
        let thread = match self.lock_worker().as_mut() {
            Some(worker) => worker.request_shutdown(),
            None => return,
        };

        // Joined without holding the lock so the executor can still reach the
        // scheduler while it finishes
        if let Some(thread) = thread {
            IndexWorker::join(thread, &self.queue);
        }
    }

    /// Whether a worker thread may still execute tasks
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(IndexWorker::is_alive)
    }

    /// Schedule a reindex of a whole project
    pub fn enqueue_reindex(&self, project: ProjectId) -> SubmitOutcome {
        self.submit(IndexTask::ProjectReindex { project })
    }

    /// Schedule indexing of a source document
    pub fn enqueue_source_document(
        &self,
        project: ProjectId,
        document: SourceDocumentId,
        snapshot: ContentSnapshot,
    ) -> SubmitOutcome {
        self.submit(IndexTask::SourceDocumentReindex {
            project,
            document,
            snapshot,
        })
    }

    /// Schedule indexing of a user's annotation document
    ///
    /// If the same document is already queued for the same user, the queued
    /// task takes over `snapshot` so that it indexes the latest content.
    pub fn enqueue_annotation_document(
        &self,
        project: ProjectId,
        document: AnnotationDocumentId,
        user: UserName,
        snapshot: ContentSnapshot,
    ) -> SubmitOutcome {
        self.submit(IndexTask::AnnotationDocumentReindex {
            project,
            document,
            user,
            snapshot,
        })
    }

    /// Submit a task to the queue
    ///
    /// The outcome is informational; callers may ignore it. A full queue
    /// never blocks the caller: the task is dropped, counted in
    /// [`SchedulerStats::tasks_rejected`] and logged.
    pub fn submit(&self, task: IndexTask) -> SubmitOutcome {
        self.metrics.tasks_submitted.fetch_add(1, Ordering::Relaxed);

        // Kept for logging, the task itself moves into the queue
        let description = task.to_string();
        let outcome = self.queue.offer(task);

        match outcome {
            SubmitOutcome::Enqueued(task_id) => {
                self.metrics.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
                info!(task_id, task = %description, "Enqueued new indexing task");
            }
            SubmitOutcome::Deduplicated(task_id) => {
                self.metrics
                    .tasks_deduplicated
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id,
                    task = %description,
                    "Matching indexing task already scheduled, skipping"
                );
            }
            SubmitOutcome::Coalesced(task_id) => {
                self.metrics.tasks_coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id,
                    task = %description,
                    "Matching indexing task already scheduled, updated snapshot"
                );
            }
            SubmitOutcome::Rejected => {
                self.metrics.tasks_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = %description,
                    capacity = self.queue.capacity(),
                    "Index queue full, dropping indexing task"
                );
            }
        }

        outcome
    }

    /// Remove every queued task owned by `user`
    ///
    /// Tasks without an owner (project and source document reindexing) are
    /// not affected, nor is a task the worker is already executing. Returns
    /// the number of tasks removed.
    pub fn cancel_all_for_user(&self, user: &UserName) -> usize {
        let removed = self.cancel_tasks_if(|task| task.owner() == Some(user));
        if removed > 0 {
            info!(%user, removed, "Cancelled pending indexing tasks for user");
        }
        removed
    }

    /// Remove every queued task belonging to `project`
    ///
    /// Returns the number of tasks removed.
    pub fn cancel_all_for_project(&self, project: ProjectId) -> usize {
        let removed = self.cancel_tasks_if(|task| task.project() == project);
        if removed > 0 {
            info!(%project, removed, "Cancelled pending indexing tasks for project");
        }
        removed
    }

    /// Remove all queued tasks matching a predicate
    ///
    /// Remaining tasks keep their relative order. Returns the number of tasks
    /// removed.
    pub fn cancel_tasks_if<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&IndexTask) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        self.metrics
            .tasks_cancelled
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Get the current number of queued tasks
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Check if any task is waiting to run
    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Get the queued tasks in execution order (for inspection)
    pub fn pending_tasks(&self) -> Vec<QueuedTask> {
        self.queue.tasks()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SchedulerStats {
            tasks_submitted: load(&self.metrics.tasks_submitted),
            tasks_enqueued: load(&self.metrics.tasks_enqueued),
            tasks_deduplicated: load(&self.metrics.tasks_deduplicated),
            tasks_coalesced: load(&self.metrics.tasks_coalesced),
            tasks_rejected: load(&self.metrics.tasks_rejected),
            tasks_cancelled: load(&self.metrics.tasks_cancelled),
            tasks_executed: load(&self.metrics.tasks_executed),
            tasks_panicked: load(&self.metrics.tasks_panicked),
            queue_size: self.queue.len(),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<IndexWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IndexScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
