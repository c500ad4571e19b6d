//! # Session Recovery
//!
//! Cleanup, deletion, and retry operations over upload sessions. Every
//! operation ends by recomputing the session's derived summary/status from
//! its batch list and persisting the whole session document, and every report
//! carries counts of what was actually changed — not what was requested.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::{project_prefix, subproject_prefix, ReadCache};
use crate::constants::events;
use crate::error::{GirderError, Result};
use crate::events::EventPublisher;
use crate::models::{Batch, BatchStatus, SessionStatus, SessionSummary, UploadSession};
use crate::store::{DocumentStore, StoreError};

use super::persist_session_update;

/// Result of `cleanup_failed_batches`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub session_id: Uuid,
    pub batches_reset: Vec<u32>,
    pub elements_deleted: u64,
    pub jobs_deleted: u64,
    pub summary: SessionSummary,
    pub status: SessionStatus,
}

/// Result of `delete_batch` and `retry_batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeleteReport {
    pub session_id: Uuid,
    pub batch_number: u32,
    pub elements_deleted: u64,
    pub jobs_deleted: u64,
    pub summary: SessionSummary,
    pub status: SessionStatus,
}

/// Result of `delete_upload_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDeleteReport {
    pub session_id: Uuid,
    pub upload_id: String,
    pub total_batches: u32,
    pub elements_deleted: u64,
    pub jobs_deleted: u64,
}

/// SessionRecovery exposes the recovery operations over upload sessions
pub struct SessionRecovery {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn ReadCache>,
    events: EventPublisher,
    save_retries: u32,
}

impl SessionRecovery {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<dyn ReadCache>) -> Self {
        Self {
            store,
            cache,
            events: EventPublisher::default(),
            save_retries: 3,
        }
    }

    /// Attach a custom event publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Delete the documents of every failed batch and reset those batches to
    /// pending. Defensive: also covers batches that failed after commit, so
    /// deletion counts reflect what was actually removed. A session with no
    /// failed batches is a no-op.
    #[instrument(skip(self))]
    pub async fn cleanup_failed_batches(&self, session_id: Uuid) -> Result<CleanupReport> {
        let session = self.load(session_id).await?;
        let failed = session.failed_batch_numbers();

        if failed.is_empty() {
            return Ok(CleanupReport {
                session_id,
                batches_reset: Vec::new(),
                elements_deleted: 0,
                jobs_deleted: 0,
                summary: session.summary,
                status: session.status,
            });
        }

        let mut elements_deleted = 0u64;
        let mut jobs_deleted = 0u64;
        let mut batches_reset = Vec::new();
        let mut first_error: Option<StoreError> = None;

        for batch_number in &failed {
            let batch = session
                .batch(*batch_number)
                .expect("failed batch numbers come from this session");
            let (elements, jobs, error) = self.delete_batch_documents(batch).await;
            elements_deleted += elements;
            jobs_deleted += jobs;
            if let Some(error) = error {
                // Stop here: the remaining ids must stay on the batch so a
                // later cleanup can retry the deletion.
                first_error = Some(error);
                break;
            }
            batches_reset.push(*batch_number);
        }

        if elements_deleted > 0 {
            self.store
                .adjust_project_element_count(session.project_id, -(elements_deleted as i64))
                .await?;
        }

        let session = persist_session_update(
            self.store.as_ref(),
            session_id,
            self.save_retries,
            |session| {
                for batch_number in &batches_reset {
                    session.reset_batch(*batch_number)?;
                }
                Ok(())
            },
        )
        .await?;

        self.invalidate_caches(&session);
        let _ = self
            .events
            .publish_for_session(
                events::BATCH_CLEANED,
                session_id,
                json!({
                    "batches_reset": &batches_reset,
                    "elements_deleted": elements_deleted,
                    "jobs_deleted": jobs_deleted,
                }),
            )
            .await;

        if let Some(error) = first_error {
            warn!(
                session_id = %session_id,
                error = %error,
                "Cleanup stopped early; partial progress persisted"
            );
            return Err(error.into());
        }

        info!(
            session_id = %session_id,
            batches = batches_reset.len(),
            elements_deleted,
            jobs_deleted,
            "Cleaned up failed batches"
        );

        Ok(CleanupReport {
            session_id,
            batches_reset,
            elements_deleted,
            jobs_deleted,
            summary: session.summary,
            status: session.status,
        })
    }

    /// Unconditionally delete a batch's created documents, regardless of its
    /// status, and reset it to pending.
    #[instrument(skip(self))]
    pub async fn delete_batch(
        &self,
        session_id: Uuid,
        batch_number: u32,
    ) -> Result<BatchDeleteReport> {
        let session = self.load(session_id).await?;
        let batch = session.batch(batch_number).ok_or_else(|| {
            GirderError::NotFoundError(format!("batch {batch_number} in session {session_id}"))
        })?;

        let (elements_deleted, jobs_deleted, error) = self.delete_batch_documents(batch).await;

        if elements_deleted > 0 {
            self.store
                .adjust_project_element_count(session.project_id, -(elements_deleted as i64))
                .await?;
        }
        if let Some(error) = error {
            // Leave the batch untouched so its remaining ids survive for a
            // later attempt.
            return Err(error.into());
        }

        let session = persist_session_update(
            self.store.as_ref(),
            session_id,
            self.save_retries,
            |session| session.reset_batch(batch_number),
        )
        .await?;

        self.invalidate_caches(&session);

        info!(
            session_id = %session_id,
            batch_number,
            elements_deleted,
            jobs_deleted,
            "Deleted batch documents and reset batch"
        );

        Ok(BatchDeleteReport {
            session_id,
            batch_number,
            elements_deleted,
            jobs_deleted,
            summary: session.summary,
            status: session.status,
        })
    }

    /// Retry a single failed batch: discard any partial state via
    /// `delete_batch`, leaving the batch pending for re-processing.
    /// `InvalidState` if the batch is not currently failed.
    #[instrument(skip(self))]
    pub async fn retry_batch(
        &self,
        session_id: Uuid,
        batch_number: u32,
    ) -> Result<BatchDeleteReport> {
        let session = self.load(session_id).await?;
        let batch = session.batch(batch_number).ok_or_else(|| {
            GirderError::NotFoundError(format!("batch {batch_number} in session {session_id}"))
        })?;
        if batch.status != BatchStatus::Failed {
            return Err(GirderError::InvalidStateError(format!(
                "batch {batch_number} is {}, only failed batches can be retried",
                batch.status
            )));
        }

        let report = self.delete_batch(session_id, batch_number).await?;
        let _ = self
            .events
            .publish_for_session(
                events::BATCH_RETRIED,
                session_id,
                json!({"batch_number": batch_number}),
            )
            .await;
        Ok(report)
    }

    /// Reset every failed batch for re-processing. Returns the cleanup
    /// report listing the batch numbers now pending.
    #[instrument(skip(self))]
    pub async fn retry_failed_batches(&self, session_id: Uuid) -> Result<CleanupReport> {
        let report = self.cleanup_failed_batches(session_id).await?;
        if !report.batches_reset.is_empty() {
            let _ = self
                .events
                .publish_for_session(
                    events::BATCH_RETRIED,
                    session_id,
                    json!({"batches_reset": &report.batches_reset}),
                )
                .await;
        }
        Ok(report)
    }

    /// Delete every document referenced by every batch, then the session
    /// document itself. Destructive and irreversible.
    #[instrument(skip(self))]
    pub async fn delete_upload_session(&self, session_id: Uuid) -> Result<SessionDeleteReport> {
        let session = self.load(session_id).await?;

        let element_results = join_all(
            session
                .batches
                .iter()
                .map(|batch| self.store.delete_elements(&batch.elements_created)),
        )
        .await;
        let job_results = join_all(
            session
                .batches
                .iter()
                .map(|batch| self.store.delete_jobs(&batch.jobs_created)),
        )
        .await;

        let mut elements_deleted = 0u64;
        let mut jobs_deleted = 0u64;
        let mut first_error: Option<StoreError> = None;
        for result in element_results {
            match result {
                Ok(count) => elements_deleted += count,
                Err(error) => first_error = first_error.or(Some(error)),
            }
        }
        for result in job_results {
            match result {
                Ok(count) => jobs_deleted += count,
                Err(error) => first_error = first_error.or(Some(error)),
            }
        }

        if elements_deleted > 0 {
            self.store
                .adjust_project_element_count(session.project_id, -(elements_deleted as i64))
                .await?;
        }

        if let Some(error) = first_error {
            // The session document survives so the remaining ids stay
            // reachable for another attempt.
            warn!(
                session_id = %session_id,
                error = %error,
                elements_deleted,
                jobs_deleted,
                "Session deletion stopped before removing the session document"
            );
            return Err(error.into());
        }

        self.store.delete_session(session_id).await?;
        self.invalidate_caches(&session);

        let _ = self
            .events
            .publish_for_session(
                events::SESSION_DELETED,
                session_id,
                json!({
                    "upload_id": &session.upload_id,
                    "elements_deleted": elements_deleted,
                    "jobs_deleted": jobs_deleted,
                }),
            )
            .await;

        info!(
            session_id = %session_id,
            elements_deleted,
            jobs_deleted,
            "Deleted upload session and all referenced documents"
        );

        Ok(SessionDeleteReport {
            session_id,
            upload_id: session.upload_id,
            total_batches: session.total_batches,
            elements_deleted,
            jobs_deleted,
        })
    }

    async fn load(&self, session_id: Uuid) -> Result<UploadSession> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(|| GirderError::NotFoundError(format!("session {session_id}")))
    }

    /// Delete one batch's documents, returning actual counts and the first
    /// store error encountered (elements first, then jobs).
    async fn delete_batch_documents(&self, batch: &Batch) -> (u64, u64, Option<StoreError>) {
        let elements = match self.store.delete_elements(&batch.elements_created).await {
            Ok(count) => count,
            Err(error) => return (0, 0, Some(error)),
        };
        let jobs = match self.store.delete_jobs(&batch.jobs_created).await {
            Ok(count) => count,
            Err(error) => return (elements, 0, Some(error)),
        };
        (elements, jobs, None)
    }

    fn invalidate_caches(&self, session: &UploadSession) {
        self.cache.invalidate(&project_prefix(session.project_id));
        if let Some(subproject_id) = session.subproject_id {
            self.cache.invalidate(&subproject_prefix(subproject_id));
        }
    }
}
