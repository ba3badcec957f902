//! Bounded task queue with coalescing
//!
//! Pending tasks are kept in first-insertion order behind a single mutex.
//! Every offer scans the queue for an equivalent task before appending, so
//! at most one entry exists per task identity. The worker blocks on a condition
//! variable while the queue is empty.

use crate::cancel::CancellationToken;
use crate::task::{IndexTask, Merge, TaskId};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A task waiting in the queue together with the id assigned on insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub id: TaskId,
    pub task: IndexTask,
}

/// What happened to a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to the tail of the queue under a new id
    Enqueued(TaskId),

    /// An equivalent task was already queued; the submission was dropped
    Deduplicated(TaskId),

    /// An equivalent task was already queued and took over the new snapshot
    Coalesced(TaskId),

    /// The queue was full and no equivalent task was queued
    Rejected,
}

impl SubmitOutcome {
    /// Id of the queue entry that will carry out the submitted work
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            SubmitOutcome::Enqueued(id)
            | SubmitOutcome::Deduplicated(id)
            | SubmitOutcome::Coalesced(id) => Some(*id),
            SubmitOutcome::Rejected => None,
        }
    }
}

/// Bounded FIFO queue of index tasks
///
/// Thread-safe; all mutation (offer, dequeue, removal, snapshot replacement)
/// happens under one lock. Operations are linear in the queue length, which is
/// bounded by the configured capacity.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

struct QueueState {
    /// Pending tasks in first-insertion order
    entries: VecDeque<QueuedTask>,

    /// Next task ID (for automatic ID assignment)
    next_task_id: TaskId,
}

impl TaskQueue {
    /// Create an empty queue holding at most `capacity` tasks
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity),
                next_task_id: 1,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Offer a task to the queue
    ///
    /// If an equivalent task is already queued the submission is folded into
    /// it and the queued entry keeps its position. Otherwise the task is
    /// appended, unless the queue is full, in which case it is rejected
    /// without blocking.
    pub fn offer(&self, task: IndexTask) -> SubmitOutcome {
        let mut state = self.lock();

        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| task.matches(&entry.task))
        {
            return match task.merge_into(&mut entry.task) {
                Merge::Discarded => SubmitOutcome::Deduplicated(entry.id),
                Merge::SnapshotReplaced => SubmitOutcome::Coalesced(entry.id),
            };
        }

        if state.entries.len() >= self.capacity {
            return SubmitOutcome::Rejected;
        }

        let id = state.next_task_id;
        state.next_task_id += 1;
        state.entries.push_back(QueuedTask { id, task });
        drop(state);

        self.available.notify_one();
        SubmitOutcome::Enqueued(id)
    }

    /// Take the oldest task without waiting
    #[cfg(test)]
    pub fn try_pop(&self) -> Option<QueuedTask> {
        self.lock().entries.pop_front()
    }

    /// Block until a task is available or `shutdown` is cancelled
    ///
    /// Returns `None` once `shutdown` is cancelled, even if tasks remain
    /// queued. Each wait is capped at `poll_interval`, so the shutdown flag is
    /// re-checked at least that often.
    pub fn next_task(
        &self,
        shutdown: &CancellationToken,
        poll_interval: Duration,
    ) -> Option<QueuedTask> {
        let mut state = self.lock();

        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            if let Some(entry) = state.entries.pop_front() {
                return Some(entry);
            }

            state = self
                .available
                .wait_timeout(state, poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Wake every thread blocked in [`next_task`](Self::next_task)
    ///
    /// Takes the lock first so a waiter cannot miss a shutdown signal raised
    /// between its flag check and its wait.
    pub fn wake_all(&self) {
        let _state = self.lock();
        self.available.notify_all();
    }

    /// Remove all tasks matching a predicate
    ///
    /// Remaining tasks keep their relative order. Returns the number of tasks
    /// removed.
    pub fn remove_if<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&IndexTask) -> bool,
    {
        let mut state = self.lock();
        let original_len = state.entries.len();
        state.entries.retain(|entry| !predicate(&entry.task));
        original_len - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the queued tasks in dequeue order (for inspection)
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.lock().entries.iter().cloned().collect()
    }

    // Every mutation leaves the queue consistent, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
