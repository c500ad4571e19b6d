//! # Transactional Writer
//!
//! Wraps creation of one element and its jobs in a single atomic
//! multi-document transaction. Created ids are tracked for accounting and
//! batch bookkeeping; the rollback mechanism is the underlying store
//! transaction, not the tracked ids.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Element, Job};
use crate::store::{DocumentStore, StoreError, StoreTransaction};

/// Errors surfaced by the transactional writer
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("transaction already finished")]
    AlreadyFinished,
}

impl From<WriterError> for crate::error::GirderError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::Store(store_err) => store_err.into(),
            WriterError::AlreadyFinished => {
                crate::error::GirderError::TransactionError(err.to_string())
            }
        }
    }
}

/// Atomic writer for one row-group: the element plus its generated jobs.
///
/// Every exit path releases the transaction exactly once: `commit` and
/// `rollback` consume it, and dropping an unfinished writer aborts it.
pub struct TransactionalWriter {
    transaction: Option<Box<dyn StoreTransaction>>,
    created_elements: Vec<Uuid>,
    created_jobs: Vec<Uuid>,
}

impl TransactionalWriter {
    /// Open a transaction scope against the store
    pub async fn start(store: &dyn DocumentStore) -> Result<Self, WriterError> {
        let transaction = store.begin().await?;
        Ok(Self {
            transaction: Some(transaction),
            created_elements: Vec::new(),
            created_jobs: Vec::new(),
        })
    }

    /// Buffer an element write, returning its id
    pub fn create_element(&mut self, element: Element) -> Result<Uuid, WriterError> {
        let transaction = self
            .transaction
            .as_mut()
            .ok_or(WriterError::AlreadyFinished)?;
        let element_id = element.element_id;
        transaction.create_element(element);
        self.created_elements.push(element_id);
        Ok(element_id)
    }

    /// Buffer a job write, returning its id
    pub fn create_job(&mut self, job: Job) -> Result<Uuid, WriterError> {
        let transaction = self
            .transaction
            .as_mut()
            .ok_or(WriterError::AlreadyFinished)?;
        let job_id = job.job_id;
        transaction.create_job(job);
        self.created_jobs.push(job_id);
        Ok(job_id)
    }

    /// Ids of elements written under this transaction
    pub fn created_elements(&self) -> &[Uuid] {
        &self.created_elements
    }

    /// Ids of jobs written under this transaction
    pub fn created_jobs(&self) -> &[Uuid] {
        &self.created_jobs
    }

    /// Commit the transaction. A failed commit has already discarded the
    /// buffered writes at the store layer, so the error propagates with
    /// nothing persisted.
    pub async fn commit(&mut self) -> Result<(), WriterError> {
        let transaction = self
            .transaction
            .take()
            .ok_or(WriterError::AlreadyFinished)?;
        transaction.commit().await?;
        debug!(
            elements = self.created_elements.len(),
            jobs = self.created_jobs.len(),
            "Committed row-group transaction"
        );
        Ok(())
    }

    /// Abort the transaction, discarding all writes made under it
    pub async fn rollback(&mut self) -> Result<(), WriterError> {
        let transaction = self
            .transaction
            .take()
            .ok_or(WriterError::AlreadyFinished)?;
        transaction.abort().await?;
        debug!(
            elements = self.created_elements.len(),
            jobs = self.created_jobs.len(),
            "Rolled back row-group transaction"
        );
        self.created_elements.clear();
        self.created_jobs.clear();
        Ok(())
    }
}

impl Drop for TransactionalWriter {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            // The store transaction aborts when dropped; nothing buffered
            // under it was ever visible.
            warn!(
                elements = self.created_elements.len(),
                jobs = self.created_jobs.len(),
                "TransactionalWriter dropped without commit or rollback; writes discarded"
            );
        }
    }
}
