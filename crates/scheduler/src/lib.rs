//! Annotation Index Scheduler
//!
//! Background reindex queue for a collaborative annotation platform.
//!
//! Whenever a project, a source document, or a user's annotation document
//! changes, the search index has to be brought up to date. This crate queues
//! those reindex requests, drops redundant ones, folds newer annotation
//! snapshots into requests that are still waiting, and runs the remaining
//! tasks one at a time on a dedicated low-priority thread. The indexing
//! itself is done by a caller-supplied executor.
//!
//! # Example
//!
//! ```
//! use annotation_index_scheduler::{
//!     CancellationToken, ContentSnapshot, IndexScheduler, IndexTask, ProjectId,
//!     SchedulerConfig, SourceDocumentId,
//! };
//! use std::sync::Arc;
//!
//! let scheduler = IndexScheduler::new(SchedulerConfig::default()).unwrap();
//!
//! // Requests made before the worker starts simply wait in the queue
//! scheduler.enqueue_reindex(ProjectId(1));
//! scheduler.enqueue_reindex(ProjectId(1)); // duplicate, dropped
//! scheduler.enqueue_source_document(
//!     ProjectId(1),
//!     SourceDocumentId(10),
//!     ContentSnapshot::new(1, "plain text"),
//! );
//! assert_eq!(scheduler.pending_count(), 2);
//!
//! scheduler
//!     .start(Arc::new(|task: IndexTask, token: &CancellationToken| {
//!         if !token.is_cancelled() {
//!             println!("indexing {}", task);
//!         }
//!     }))
//!     .unwrap();
//!
//! scheduler.stop();
//! ```

mod cancel;
mod config;
mod error;
mod queue;
mod scheduler;
mod task;
mod worker;

// Re-export public API
pub use cancel::CancellationToken;
pub use config::{SchedulerConfig, MAX_WORKER_NICENESS};
pub use error::{ConfigError, SchedulerError, SchedulerResult};
pub use queue::{QueuedTask, SubmitOutcome};
pub use scheduler::{IndexScheduler, SchedulerStats};
pub use task::{
    AnnotationDocumentId, ContentSnapshot, IndexTask, ProjectId, SourceDocumentId, TaskId,
    UserName,
};
pub use worker::TaskExecutor;
