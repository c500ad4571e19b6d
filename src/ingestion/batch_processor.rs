//! # Batch Processor
//!
//! Drives the ingestion state machine for one upload session: claims a
//! pending batch, runs its rows through the transactional writer and job
//! generator, records the outcome on the session, and notifies the
//! aggregation scheduler. Batch failures are isolated and recorded — they
//! never crash the session.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::{project_prefix, subproject_prefix, ReadCache};
use crate::constants::events;
use crate::error::{GirderError, Result};
use crate::events::EventPublisher;
use crate::models::{
    BatchStatus, Element, SessionStatus, SessionSummary, UploadSession,
};
use crate::store::DocumentStore;
use crate::workflow::{JobGenerator, WorkflowTemplates};

use super::aggregation::AggregationScheduler;
use super::persist_session_update;
use super::row::{ProjectContext, RowTransformer, SpreadsheetRowTransformer};
use super::transactional_writer::TransactionalWriter;

/// Request to open a new upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub upload_id: String,
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    pub total_batches: u32,
}

/// Result of processing one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub session_id: Uuid,
    pub batch_number: u32,
    pub batch_status: BatchStatus,
    pub elements_created: usize,
    pub jobs_created: usize,
    pub duplicates_skipped: u32,
    pub error_message: Option<String>,
    pub session_status: SessionStatus,
    pub summary: SessionSummary,
}

/// BatchProcessor coordinates session creation and batch ingestion
pub struct BatchProcessor {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn ReadCache>,
    events: EventPublisher,
    transformer: Arc<dyn RowTransformer>,
    generator: JobGenerator,
    scheduler: Option<AggregationScheduler>,
    save_retries: u32,
}

impl BatchProcessor {
    /// Create a processor with the default transformer and no scheduler
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn ReadCache>,
        templates: WorkflowTemplates,
    ) -> Self {
        Self {
            store,
            cache,
            events: EventPublisher::default(),
            transformer: Arc::new(SpreadsheetRowTransformer),
            generator: JobGenerator::new(templates),
            scheduler: None,
            save_retries: 3,
        }
    }

    /// Attach a custom event publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Attach the aggregation scheduler notified on batch completion
    pub fn with_scheduler(mut self, scheduler: AggregationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Replace the row transformer
    pub fn with_transformer(mut self, transformer: Arc<dyn RowTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Open a new pending session partitioned into `total_batches` batches
    #[instrument(skip(self, request), fields(upload_id = %request.upload_id))]
    pub async fn create_session(&self, request: SessionRequest) -> Result<UploadSession> {
        if self.store.find_project(request.project_id).await?.is_none() {
            return Err(GirderError::NotFoundError(format!(
                "project {}",
                request.project_id
            )));
        }
        if let Some(subproject_id) = request.subproject_id {
            if self.store.find_subproject(subproject_id).await?.is_none() {
                return Err(GirderError::NotFoundError(format!(
                    "subproject {subproject_id}"
                )));
            }
        }

        let session = UploadSession::new(
            request.upload_id,
            request.project_id,
            request.subproject_id,
            request.total_batches,
        )?;
        self.store.insert_session(session.clone()).await?;

        let _ = self
            .events
            .publish_for_session(
                events::SESSION_CREATED,
                session.session_id,
                json!({"upload_id": &session.upload_id, "total_batches": session.total_batches}),
            )
            .await;

        info!(
            session_id = %session.session_id,
            total_batches = session.total_batches,
            "Created upload session"
        );
        Ok(session)
    }

    /// Process one batch of raw rows.
    ///
    /// Fails with `NotFound` for an unknown session or batch and
    /// `InvalidState` unless the batch is pending. Row-level failures roll
    /// back the batch transaction and are recorded on the batch; the call
    /// still returns the (failed) outcome.
    #[instrument(skip(self, rows))]
    pub async fn process_batch(
        &self,
        session_id: Uuid,
        batch_number: u32,
        rows: &[Value],
    ) -> Result<BatchOutcome> {
        // Claim: verify the batch is pending and stamp the session so the
        // stall sweeper sees an active worker. The recompute flips a fresh
        // session from pending to in_progress.
        let session = persist_session_update(
            self.store.as_ref(),
            session_id,
            self.save_retries,
            |session| {
                let batch = session.batch(batch_number).ok_or_else(|| {
                    GirderError::NotFoundError(format!(
                        "batch {batch_number} in session {session_id}"
                    ))
                })?;
                if batch.status != BatchStatus::Pending {
                    return Err(GirderError::InvalidStateError(format!(
                        "batch {batch_number} is {}, expected pending",
                        batch.status
                    )));
                }
                session.recompute();
                Ok(())
            },
        )
        .await?;

        let context = ProjectContext {
            project_id: session.project_id,
            subproject_id: session.subproject_id,
        };

        let mut writer = TransactionalWriter::start(self.store.as_ref()).await?;
        let mut duplicates_skipped = 0u32;
        let mut seen_references: HashSet<String> = HashSet::new();
        let mut batch_error: Option<GirderError> = None;

        for (row_index, raw) in rows.iter().enumerate() {
            let row_number = row_index + 1;
            match self.ingest_row(&mut writer, raw, &context, &mut seen_references).await {
                Ok(true) => {}
                Ok(false) => duplicates_skipped += 1,
                Err(err) => {
                    batch_error = Some(with_row_context(row_number, err));
                    break;
                }
            }
        }

        // Commit failures behave like row failures: the store has already
        // discarded the buffered writes.
        if batch_error.is_none() {
            if let Err(err) = writer.commit().await {
                batch_error = Some(err.into());
            }
        }

        if let Some(err) = batch_error {
            if let Err(rollback_err) = writer.rollback().await {
                // Already finished after a failed commit; nothing persisted
                warn!(error = %rollback_err, "Rollback after batch failure");
            }
            return self
                .record_failure(session_id, batch_number, err)
                .await;
        }

        let elements_created = writer.created_elements().to_vec();
        let jobs_created = writer.created_jobs().to_vec();

        let session = persist_session_update(
            self.store.as_ref(),
            session_id,
            self.save_retries,
            |session| {
                session.record_batch_success(
                    batch_number,
                    elements_created.clone(),
                    jobs_created.clone(),
                    duplicates_skipped,
                )
            },
        )
        .await?;

        if !elements_created.is_empty() {
            self.store
                .adjust_project_element_count(session.project_id, elements_created.len() as i64)
                .await?;
        }
        self.invalidate_caches(&session);
        self.notify_aggregation(&session);

        let _ = self
            .events
            .publish_for_session(
                events::BATCH_COMPLETED,
                session_id,
                json!({
                    "batch_number": batch_number,
                    "elements_created": elements_created.len(),
                    "jobs_created": jobs_created.len(),
                    "duplicates_skipped": duplicates_skipped,
                }),
            )
            .await;
        if session.status == SessionStatus::Completed {
            let _ = self
                .events
                .publish_for_session(
                    events::SESSION_COMPLETED,
                    session_id,
                    json!({"summary": session.summary}),
                )
                .await;
        }

        info!(
            batch_number,
            elements = elements_created.len(),
            jobs = jobs_created.len(),
            duplicates = duplicates_skipped,
            session_status = %session.status,
            "Batch committed"
        );

        Ok(BatchOutcome {
            session_id,
            batch_number,
            batch_status: BatchStatus::Success,
            elements_created: elements_created.len(),
            jobs_created: jobs_created.len(),
            duplicates_skipped,
            error_message: None,
            session_status: session.status,
            summary: session.summary,
        })
    }

    /// Ingest one row into the open transaction. Returns `Ok(false)` for a
    /// duplicate (skipped, not an error).
    async fn ingest_row(
        &self,
        writer: &mut TransactionalWriter,
        raw: &Value,
        context: &ProjectContext,
        seen_references: &mut HashSet<String>,
    ) -> Result<bool> {
        let row = self.transformer.transform(raw, context)?;

        if seen_references.contains(&row.reference)
            || self
                .store
                .element_exists(context.project_id, &row.reference)
                .await?
        {
            return Ok(false);
        }
        seen_references.insert(row.reference.clone());

        let element = Element::from_new(row.into_new_element(context));
        writer.create_element(element.clone())?;
        self.generator.generate(writer, &element)?;
        Ok(true)
    }

    async fn record_failure(
        &self,
        session_id: Uuid,
        batch_number: u32,
        error: GirderError,
    ) -> Result<BatchOutcome> {
        let message = error.to_string();
        let details = json!({"error": &message, "kind": error_kind(&error)});

        let session = persist_session_update(
            self.store.as_ref(),
            session_id,
            self.save_retries,
            |session| {
                session.record_batch_failure(batch_number, message.clone(), Some(details.clone()))
            },
        )
        .await?;

        let _ = self
            .events
            .publish_for_session(
                events::BATCH_FAILED,
                session_id,
                json!({"batch_number": batch_number, "error": &message}),
            )
            .await;

        warn!(batch_number, error = %message, "Batch failed and rolled back");

        Ok(BatchOutcome {
            session_id,
            batch_number,
            batch_status: BatchStatus::Failed,
            elements_created: 0,
            jobs_created: 0,
            duplicates_skipped: 0,
            error_message: Some(message),
            session_status: session.status,
            summary: session.summary,
        })
    }

    fn invalidate_caches(&self, session: &UploadSession) {
        self.cache.invalidate(&project_prefix(session.project_id));
        if let Some(subproject_id) = session.subproject_id {
            self.cache.invalidate(&subproject_prefix(subproject_id));
        }
    }

    fn notify_aggregation(&self, session: &UploadSession) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule_project(session.project_id);
            if let Some(subproject_id) = session.subproject_id {
                scheduler.schedule_subproject(subproject_id);
            }
        }
    }
}

/// Prefix row position into the message while preserving the error taxonomy
fn with_row_context(row_number: usize, error: GirderError) -> GirderError {
    match error {
        GirderError::ValidationError(msg) => {
            GirderError::ValidationError(format!("row {row_number}: {msg}"))
        }
        GirderError::StoreError(msg) => {
            GirderError::StoreError(format!("row {row_number}: {msg}"))
        }
        other => other,
    }
}

fn error_kind(error: &GirderError) -> &'static str {
    match error {
        GirderError::ValidationError(_) => "validation",
        GirderError::TransactionError(_) => "transaction",
        GirderError::UnknownWorkflow(_) => "unknown_workflow",
        GirderError::NotFoundError(_) => "not_found",
        GirderError::InvalidStateError(_) => "invalid_state",
        GirderError::StoreError(_) => "store",
        GirderError::ConfigurationError(_) => "configuration",
    }
}
