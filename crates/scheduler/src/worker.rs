//! Index worker thread
//!
//! A single low-priority thread that pulls tasks from the [`TaskQueue`] and
//! runs them one at a time through the task executor. Tasks never run
//! concurrently: index writes must not race each other.

use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{QueuedTask, TaskQueue};
use crate::scheduler::SchedulerMetrics;
use crate::task::IndexTask;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Callback that performs the actual index update for a task.
///
/// The worker hands over ownership of each dequeued task. The token is the
/// scheduler's shutdown signal; long-running executors may poll it and return
/// early once it is cancelled. Failures are the executor's own business: the
/// scheduler neither retries nor reorders.
pub type TaskExecutor = Arc<dyn Fn(IndexTask, &CancellationToken) + Send + Sync>;

/// Handle to the running worker thread
pub(crate) struct IndexWorker {
    thread: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    alive: Arc<AtomicBool>,
    queue: Arc<TaskQueue>,
}

/// Clears the liveness flag once the worker thread is done executing tasks,
/// including when it unwinds.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IndexWorker {
    /// Spawn the worker thread. It starts consuming immediately.
    pub(crate) fn spawn(
        queue: Arc<TaskQueue>,
        executor: TaskExecutor,
        metrics: Arc<SchedulerMetrics>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<Self> {
        let shutdown = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let niceness = config.worker_niceness;
        let poll_interval = config.idle_poll_interval();

        let thread = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let alive = AliveGuard(alive.clone());
            thread::Builder::new()
                .name(config.worker_thread_name.clone())
                .spawn(move || {
                    let _alive = alive;
                    lower_current_thread_priority(niceness);
                    Self::run(&queue, &executor, &metrics, &shutdown, poll_interval);
                    // Released while still marked alive
                    drop(executor);
                })
                .map_err(SchedulerError::WorkerSpawn)?
        };

        info!(
            thread = %config.worker_thread_name,
            niceness,
            "Started search indexing worker"
        );

        Ok(Self {
            thread: Some(thread),
            shutdown,
            alive,
            queue,
        })
    }

    /// Whether the worker thread may still execute a task.
    ///
    /// Stays `true` after shutdown has been requested until the thread has
    /// left its loop.
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Main worker loop.
    ///
    /// Blocks until a task is available, executes it, and repeats until the
    /// shutdown token is cancelled. The token is checked before every
    /// dequeue, so nothing starts after shutdown has been signalled.
    fn run(
        queue: &TaskQueue,
        executor: &TaskExecutor,
        metrics: &SchedulerMetrics,
        shutdown: &CancellationToken,
        poll_interval: Duration,
    ) {
        while let Some(QueuedTask { id, task }) = queue.next_task(shutdown, poll_interval) {
            let started = Instant::now();
            let description = task.to_string();
            debug!(
                task_id = id,
                kind = task.kind(),
                task = %description,
                "Executing index task"
            );

            let result = panic::catch_unwind(AssertUnwindSafe(|| executor(task, shutdown)));
            metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(()) => debug!(
                    task_id = id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Index task finished"
                ),
                Err(payload) => {
                    metrics.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                    error!(
                        task_id = id,
                        task = %description,
                        panic = panic_message(payload.as_ref()),
                        "Index task executor panicked"
                    );
                }
            }
        }

        debug!(pending = queue.len(), "Index worker loop exited");
    }

    /// Signal the worker to stop without waiting for it.
    ///
    /// Returns the thread handle to join, unless the handle was already taken
    /// or the caller is the worker thread itself. In the latter case the handle
    /// stays in place and the loop exits on its own once the current task
    /// returns.
    pub(crate) fn request_shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.shutdown.cancel();
        self.queue.wake_all();

        let on_worker_thread = self
            .thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id());
        if on_worker_thread {
            debug!("Index worker stop requested from the worker thread");
            return None;
        }

        self.thread.take()
    }

    /// Wait for a worker thread handed out by
    /// [`request_shutdown`](Self::request_shutdown) to exit.
    pub(crate) fn join(thread: JoinHandle<()>, queue: &TaskQueue) {
        if thread.join().is_err() {
            error!("Index worker thread panicked");
        }

        info!(pending = queue.len(), "Stopped search indexing worker");
    }

    /// Signal the worker to stop and wait for it to exit.
    ///
    /// The task currently executing, if any, runs to completion (or until it
    /// observes the token). Queued tasks are left in the queue.
    pub(crate) fn shutdown(mut self) {
        if let Some(thread) = self.request_shutdown() {
            Self::join(thread, &self.queue);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Lower the scheduling priority of the calling thread.
#[cfg(target_os = "linux")]
fn lower_current_thread_priority(niceness: i32) {
    if niceness == 0 {
        return;
    }

    // On Linux PRIO_PROCESS with who = 0 addresses the calling thread only.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, niceness) };
    if rc != 0 {
        tracing::warn!(
            niceness,
            error = %std::io::Error::last_os_error(),
            "Failed to lower index worker priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn lower_current_thread_priority(niceness: i32) {
    if niceness != 0 {
        debug!(
            niceness,
            "Thread priority adjustment unsupported on this platform"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ContentSnapshot, ProjectId, SourceDocumentId};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn project(id: u64) -> IndexTask {
        IndexTask::ProjectReindex {
            project: ProjectId(id),
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_worker_thread_name("index-worker-test")
            .with_idle_poll_interval(Duration::from_millis(10))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_worker_executes_tasks_in_order() {
        let queue = Arc::new(TaskQueue::new(10));
        let metrics = Arc::new(SchedulerMetrics::default());
        let executed = Arc::new(Mutex::new(Vec::new()));

        let executor: TaskExecutor = {
            let executed = executed.clone();
            Arc::new(move |task: IndexTask, _token: &CancellationToken| {
                executed.lock().unwrap().push(task.project().0);
            })
        };

        queue.offer(project(1));
        queue.offer(project(2));
        queue.offer(project(3));

        let worker =
            IndexWorker::spawn(queue.clone(), executor, metrics.clone(), &test_config()).unwrap();

        assert!(wait_until(
            || metrics.tasks_executed.load(Ordering::Relaxed) == 3
        ));
        assert_eq!(*executed.lock().unwrap(), vec![1, 2, 3]);

        worker.shutdown();
    }

    #[test]
    fn test_worker_runs_on_named_thread() {
        let queue = Arc::new(TaskQueue::new(10));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let executor: TaskExecutor = Arc::new(move |_task: IndexTask, _token: &CancellationToken| {
            let name = thread::current().name().map(str::to_string);
            tx.lock().unwrap().send(name).unwrap();
        });

        let worker = IndexWorker::spawn(
            queue.clone(),
            executor,
            Arc::new(SchedulerMetrics::default()),
            &test_config(),
        )
        .unwrap();
        queue.offer(project(1));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("index-worker-test"));

        worker.shutdown();
    }

    #[test]
    fn test_worker_survives_executor_panic() {
        let queue = Arc::new(TaskQueue::new(10));
        let metrics = Arc::new(SchedulerMetrics::default());
        let completed = Arc::new(AtomicUsize::new(0));

        let executor: TaskExecutor = {
            let completed = completed.clone();
            Arc::new(move |task: IndexTask, _token: &CancellationToken| {
                if task.project() == ProjectId(1) {
                    panic!("index storage unavailable");
                }
                completed.fetch_add(1, Ordering::SeqCst);
            })
        };

        queue.offer(project(1));
        queue.offer(project(2));

        let worker =
            IndexWorker::spawn(queue.clone(), executor, metrics.clone(), &test_config()).unwrap();

        assert!(wait_until(
            || metrics.tasks_executed.load(Ordering::Relaxed) == 2
        ));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.tasks_panicked.load(Ordering::Relaxed), 1);

        worker.shutdown();
    }

    #[test]
    fn test_shutdown_leaves_queued_tasks() {
        let queue = Arc::new(TaskQueue::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let executed = Arc::new(AtomicUsize::new(0));

        let executor: TaskExecutor = {
            let executed = executed.clone();
            Arc::new(move |_task: IndexTask, _token: &CancellationToken| {
                executed.fetch_add(1, Ordering::SeqCst);
                started_tx.lock().unwrap().send(()).unwrap();
                let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            })
        };

        queue.offer(project(1));
        queue.offer(IndexTask::SourceDocumentReindex {
            project: ProjectId(1),
            document: SourceDocumentId(2),
            snapshot: ContentSnapshot::new(1, "text"),
        });

        let worker = IndexWorker::spawn(
            queue.clone(),
            executor,
            Arc::new(SchedulerMetrics::default()),
            &test_config(),
        )
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Release the in-flight task only after shutdown has been signalled
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();
        });
        worker.shutdown();
        releaser.join().unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_executor_observes_shutdown_token() {
        let queue = Arc::new(TaskQueue::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let observed = Arc::new(AtomicUsize::new(0));

        let executor: TaskExecutor = {
            let observed = observed.clone();
            Arc::new(move |_task: IndexTask, token: &CancellationToken| {
                started_tx.lock().unwrap().send(()).unwrap();
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                observed.fetch_add(1, Ordering::SeqCst);
            })
        };

        queue.offer(project(1));
        let worker = IndexWorker::spawn(
            queue.clone(),
            executor,
            Arc::new(SchedulerMetrics::default()),
            &test_config(),
        )
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.shutdown();

        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_alive_until_thread_exits() {
        let queue = Arc::new(TaskQueue::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);

        let executor: TaskExecutor = Arc::new(move |_task: IndexTask, _token: &CancellationToken| {
            started_tx.lock().unwrap().send(()).unwrap();
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
        });

        queue.offer(project(1));
        let mut worker = IndexWorker::spawn(
            queue.clone(),
            executor,
            Arc::new(SchedulerMetrics::default()),
            &test_config(),
        )
        .unwrap();
        assert!(worker.is_alive());

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let thread = worker.request_shutdown().unwrap();

        // Shutdown was requested but the task is still executing
        assert!(worker.is_alive());
        assert!(worker.request_shutdown().is_none());

        release_tx.send(()).unwrap();
        IndexWorker::join(thread, &queue);
        assert!(!worker.is_alive());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic payload>");
    }
}
