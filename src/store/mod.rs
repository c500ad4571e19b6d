//! # Document Store Seam
//!
//! The persistence driver is an external collaborator: the ingestion core is
//! written against [`DocumentStore`], a transactional document store with
//! session/transaction primitives, typed queries, id-set deletes, and a
//! compare-and-swap save for upload sessions. [`MemoryStore`] is the in-crate
//! implementation used by the test suites and by embedders without a driver.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::GirderError;
use crate::models::{AggregateStats, Element, Job, Project, Subproject, UploadSession};

pub use memory::MemoryStore;

/// Errors surfaced by the store layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("version conflict on session {0}")]
    Conflict(Uuid),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for GirderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => GirderError::NotFoundError(msg),
            StoreError::Conflict(id) => {
                GirderError::TransactionError(format!("version conflict on session {id}"))
            }
            StoreError::DuplicateKey(msg) => {
                GirderError::TransactionError(format!("duplicate key: {msg}"))
            }
            StoreError::TransactionAborted(msg) => GirderError::TransactionError(msg),
            StoreError::Backend(msg) => GirderError::StoreError(msg),
        }
    }
}

/// One multi-document transaction scope.
///
/// Writes are buffered until `commit`; `abort` (or dropping the transaction)
/// discards them. No buffered document is visible to readers before commit.
#[async_trait]
pub trait StoreTransaction: Send {
    fn create_element(&mut self, element: Element);

    fn create_job(&mut self, job: Job);

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

/// Transactional document store with the session primitives the ingestion
/// core consumes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a snapshot-isolated transaction scope
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    // Projects

    async fn insert_project(&self, project: Project) -> StoreResult<()>;

    async fn find_project(&self, project_id: Uuid) -> StoreResult<Option<Project>>;

    /// Atomically apply a relative delta to the denormalized element counter,
    /// returning the new count
    async fn adjust_project_element_count(&self, project_id: Uuid, delta: i64)
        -> StoreResult<i64>;

    async fn set_project_stats(&self, project_id: Uuid, stats: AggregateStats) -> StoreResult<()>;

    // Subprojects

    async fn insert_subproject(&self, subproject: Subproject) -> StoreResult<()>;

    async fn find_subproject(&self, subproject_id: Uuid) -> StoreResult<Option<Subproject>>;

    async fn set_subproject_stats(
        &self,
        subproject_id: Uuid,
        stats: AggregateStats,
    ) -> StoreResult<()>;

    // Elements

    async fn find_element(&self, element_id: Uuid) -> StoreResult<Option<Element>>;

    /// Whether an element with this reference already exists in the project
    async fn element_exists(&self, project_id: Uuid, reference: &str) -> StoreResult<bool>;

    /// Delete by id set, returning the number actually removed
    async fn delete_elements(&self, element_ids: &[Uuid]) -> StoreResult<u64>;

    /// Elements created after `since` that declare a workflow but own zero
    /// jobs — evidence of a crash between record-write and job generation
    async fn find_workflow_elements_without_jobs(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Element>>;

    // Jobs

    async fn insert_job(&self, job: Job) -> StoreResult<()>;

    /// Jobs owned by an element, ordered by `order_index`
    async fn find_jobs_by_element(&self, element_id: Uuid) -> StoreResult<Vec<Job>>;

    async fn update_job_order(&self, job_id: Uuid, order_index: i64) -> StoreResult<()>;

    /// Delete by id set, returning the number actually removed
    async fn delete_jobs(&self, job_ids: &[Uuid]) -> StoreResult<u64>;

    /// Jobs whose owning element no longer exists
    async fn find_orphaned_jobs(&self) -> StoreResult<Vec<Job>>;

    // Upload sessions

    async fn insert_session(&self, session: UploadSession) -> StoreResult<()>;

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<UploadSession>>;

    /// Compare-and-swap save: succeeds only when the stored version matches
    /// `session.version`, then persists with the version bumped. Returns the
    /// new version.
    async fn save_session(&self, session: &UploadSession) -> StoreResult<u64>;

    /// Delete the session document itself, returning whether it existed
    async fn delete_session(&self, session_id: Uuid) -> StoreResult<bool>;

    /// Sessions still `in_progress` whose last update is older than the
    /// given instant
    async fn find_stalled_sessions(
        &self,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<UploadSession>>;

    // Aggregates

    /// Count elements/jobs owned by a project
    async fn project_aggregates(&self, project_id: Uuid) -> StoreResult<AggregateStats>;

    /// Count elements/jobs owned by a subproject
    async fn subproject_aggregates(&self, subproject_id: Uuid) -> StoreResult<AggregateStats>;
}
