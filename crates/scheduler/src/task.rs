//! Index task definitions
//!
//! Defines the three kinds of reindex work the scheduler accepts, the identity
//! types they are keyed by, and the matching/merging rules used to coalesce
//! equivalent requests while they wait in the queue.

use std::fmt;
use std::sync::Arc;

/// Project identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(pub u64);

/// Source document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceDocumentId(pub u64);

/// Annotation document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationDocumentId(pub u64);

/// Name of the user owning an annotation document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserName(String);

impl UserName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SourceDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AnnotationDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory snapshot of a document's content at enqueue time
///
/// Cloning is cheap: the text is shared behind an `Arc`. The revision is
/// supplied by the caller and is only used to tell snapshots apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot {
    revision: u64,
    text: Arc<str>,
}

impl ContentSnapshot {
    pub fn new(revision: u64, text: impl Into<Arc<str>>) -> Self {
        Self {
            revision,
            text: text.into(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Unique identifier assigned to a task when it first enters the queue
pub type TaskId = u64;

/// Reindex task
///
/// Every variant records the project it belongs to. The project is context,
/// not identity: equivalence is decided by [`IndexTask::matches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTask {
    /// Rebuild the index of a whole project from storage
    ProjectReindex { project: ProjectId },

    /// Reindex one source document
    SourceDocumentReindex {
        project: ProjectId,
        document: SourceDocumentId,
        snapshot: ContentSnapshot,
    },

    /// Reindex one user's annotation layer over a document
    AnnotationDocumentReindex {
        project: ProjectId,
        document: AnnotationDocumentId,
        user: UserName,
        snapshot: ContentSnapshot,
    },
}

/// Result of folding an incoming task into an equivalent queued one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Merge {
    /// The incoming task was redundant and has been dropped
    Discarded,

    /// The queued task now carries the incoming task's snapshot
    SnapshotReplaced,
}

impl IndexTask {
    pub fn project(&self) -> ProjectId {
        match self {
            IndexTask::ProjectReindex { project }
            | IndexTask::SourceDocumentReindex { project, .. }
            | IndexTask::AnnotationDocumentReindex { project, .. } => *project,
        }
    }

    /// User owning this task, if any.
    ///
    /// Project and source document reindexing belong to no user and therefore
    /// outlive user-scoped cancellation.
    pub fn owner(&self) -> Option<&UserName> {
        match self {
            IndexTask::AnnotationDocumentReindex { user, .. } => Some(user),
            IndexTask::ProjectReindex { .. } | IndexTask::SourceDocumentReindex { .. } => None,
        }
    }

    pub fn snapshot(&self) -> Option<&ContentSnapshot> {
        match self {
            IndexTask::ProjectReindex { .. } => None,
            IndexTask::SourceDocumentReindex { snapshot, .. }
            | IndexTask::AnnotationDocumentReindex { snapshot, .. } => Some(snapshot),
        }
    }

    /// Short name of the task kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            IndexTask::ProjectReindex { .. } => "project",
            IndexTask::SourceDocumentReindex { .. } => "source-document",
            IndexTask::AnnotationDocumentReindex { .. } => "annotation-document",
        }
    }

    /// Whether `self` and `other` refer to the same unit of work
    ///
    /// Tasks of different kinds never match, even when they point at the same
    /// underlying document.
    pub fn matches(&self, other: &IndexTask) -> bool {
        match (self, other) {
            (
                IndexTask::ProjectReindex { project: a },
                IndexTask::ProjectReindex { project: b },
            ) => a == b,
            (
                IndexTask::SourceDocumentReindex { document: a, .. },
                IndexTask::SourceDocumentReindex { document: b, .. },
            ) => a == b,
            (
                IndexTask::AnnotationDocumentReindex {
                    document: a,
                    user: user_a,
                    ..
                },
                IndexTask::AnnotationDocumentReindex {
                    document: b,
                    user: user_b,
                    ..
                },
            ) => a == b && user_a == user_b,
            _ => false,
        }
    }

    /// Fold `self` into an already queued task that it [`matches`](Self::matches)
    ///
    /// Project and source document tasks read current storage when they run,
    /// so the incoming request is simply dropped. Annotation document tasks
    /// hand their snapshot over so the queued task indexes the latest content.
    pub(crate) fn merge_into(self, queued: &mut IndexTask) -> Merge {
        debug_assert!(self.matches(queued));

        match (self, queued) {
            (
                IndexTask::AnnotationDocumentReindex { snapshot, .. },
                IndexTask::AnnotationDocumentReindex {
                    snapshot: queued_snapshot,
                    ..
                },
            ) => {
                *queued_snapshot = snapshot;
                Merge::SnapshotReplaced
            }
            _ => Merge::Discarded,
        }
    }
}

impl fmt::Display for IndexTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexTask::ProjectReindex { project } => {
                write!(f, "project reindex [project={}]", project)
            }
            IndexTask::SourceDocumentReindex {
                project,
                document,
                snapshot,
            } => write!(
                f,
                "source document reindex [project={}, document={}, revision={}]",
                project,
                document,
                snapshot.revision()
            ),
            IndexTask::AnnotationDocumentReindex {
                project,
                document,
                user,
                snapshot,
            } => write!(
                f,
                "annotation document reindex [project={}, document={}, user={}, revision={}]",
                project,
                document,
                user,
                snapshot.revision()
            ),
        }
    }
}
