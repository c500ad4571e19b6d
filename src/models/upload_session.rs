use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{GirderError, Result};

/// Session status, derived from batch outcomes.
///
/// Never set directly except `Pending` at creation: every mutating operation
/// ends in [`UploadSession::recompute`], which re-derives this value from the
/// batch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Initial state before any batch has been claimed
    Pending,
    /// At least one batch is still awaiting processing
    InProgress,
    /// Every batch succeeded
    Completed,
    /// Every batch failed
    Failed,
    /// A mix of successes and failures, nothing left pending
    PartiallyCompleted,
}

impl SessionStatus {
    /// Check if this is a terminal state for the ingestion run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyCompleted
        )
    }

    /// Check if a worker is expected to still be producing progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallyCompleted => write!(f, "partially_completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            _ => Err(format!("Invalid session status: {s}")),
        }
    }
}

/// Batch status within a session.
///
/// `pending → success | failed`; `failed → pending` only via explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Success,
    Failed,
}

impl BatchStatus {
    /// Check if the batch has been processed (successfully or not)
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

/// Aggregate counts recomputed from the batch list on every mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub successful_batches: u32,
    pub failed_batches: u32,
    pub pending_batches: u32,
    pub total_elements_created: u64,
    pub total_jobs_created: u64,
    pub duplicates_skipped: u64,
}

/// One fixed-size chunk of rows within an upload session.
///
/// The created-id lists are the sole source of truth for what must be deleted
/// on rollback or cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: u32,
    pub status: BatchStatus,
    pub elements_created: Vec<Uuid>,
    pub jobs_created: Vec<Uuid>,
    pub duplicates_skipped: u32,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

impl Batch {
    fn new(batch_number: u32) -> Self {
        Self {
            batch_number,
            status: BatchStatus::Pending,
            elements_created: Vec::new(),
            jobs_created: Vec::new(),
            duplicates_skipped: 0,
            error_message: None,
            error_details: None,
        }
    }

    /// Record a committed batch: created ids, duplicate count, success status
    pub fn record_success(
        &mut self,
        elements_created: Vec<Uuid>,
        jobs_created: Vec<Uuid>,
        duplicates_skipped: u32,
    ) {
        self.elements_created = elements_created;
        self.jobs_created = jobs_created;
        self.duplicates_skipped = duplicates_skipped;
        self.status = BatchStatus::Success;
        self.error_message = None;
        self.error_details = None;
    }

    /// Record a rolled-back batch. The transaction has already discarded its
    /// writes, so the created-id lists stay empty.
    pub fn record_failure(
        &mut self,
        error_message: impl Into<String>,
        error_details: Option<serde_json::Value>,
    ) {
        self.elements_created.clear();
        self.jobs_created.clear();
        self.duplicates_skipped = 0;
        self.status = BatchStatus::Failed;
        self.error_message = Some(error_message.into());
        self.error_details = error_details;
    }

    /// Reset to pending for retry, clearing accounting and residual errors
    pub fn reset(&mut self) {
        self.status = BatchStatus::Pending;
        self.elements_created.clear();
        self.jobs_created.clear();
        self.duplicates_skipped = 0;
        self.error_message = None;
        self.error_details = None;
    }
}

/// UploadSession is the durable record of one ingestion run, partitioned into
/// numbered batches. It exclusively owns its batch list; all mutation flows
/// through [`UploadSession::recompute`] so that `status` and `summary` always
/// agree with the batches they summarize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: Uuid,
    /// External correlation id supplied by the upload transport
    pub upload_id: String,
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    pub total_batches: u32,
    pub batches: Vec<Batch>,
    pub status: SessionStatus,
    pub summary: SessionSummary,
    /// Optimistic-concurrency token; every save is a compare-and-swap
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    /// Create a pending session with `total_batches` empty batches
    pub fn new(
        upload_id: impl Into<String>,
        project_id: Uuid,
        subproject_id: Option<Uuid>,
        total_batches: u32,
    ) -> Result<Self> {
        if total_batches == 0 {
            return Err(GirderError::ValidationError(
                "total_batches must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            session_id: Uuid::new_v4(),
            upload_id: upload_id.into(),
            project_id,
            subproject_id,
            total_batches,
            batches: (1..=total_batches).map(Batch::new).collect(),
            status: SessionStatus::Pending,
            summary: SessionSummary {
                pending_batches: total_batches,
                ..SessionSummary::default()
            },
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Look up a batch by its 1-indexed number
    pub fn batch(&self, batch_number: u32) -> Option<&Batch> {
        self.batches
            .iter()
            .find(|b| b.batch_number == batch_number)
    }

    fn batch_mut(&mut self, batch_number: u32) -> Result<&mut Batch> {
        let session_id = self.session_id;
        self.batches
            .iter_mut()
            .find(|b| b.batch_number == batch_number)
            .ok_or_else(|| {
                GirderError::NotFoundError(format!(
                    "batch {batch_number} in session {session_id}"
                ))
            })
    }

    /// Derive the session status from the batch list.
    ///
    /// All success → completed; all failed → failed; any pending →
    /// in_progress; otherwise a mix of outcomes → partially_completed.
    pub fn derive_status(&self) -> SessionStatus {
        if self.batches.iter().all(|b| b.status == BatchStatus::Success) {
            SessionStatus::Completed
        } else if self.batches.iter().all(|b| b.status == BatchStatus::Failed) {
            SessionStatus::Failed
        } else if self.batches.iter().any(|b| b.status == BatchStatus::Pending) {
            SessionStatus::InProgress
        } else {
            SessionStatus::PartiallyCompleted
        }
    }

    /// Recompute `summary` and `status` from the batch list and stamp
    /// `updated_at`. `completed_at` is set once when the derived status turns
    /// terminal and cleared if a retry re-opens the session.
    pub fn recompute(&mut self) {
        let mut summary = SessionSummary::default();
        for batch in &self.batches {
            match batch.status {
                BatchStatus::Success => summary.successful_batches += 1,
                BatchStatus::Failed => summary.failed_batches += 1,
                BatchStatus::Pending => summary.pending_batches += 1,
            }
            summary.total_elements_created += batch.elements_created.len() as u64;
            summary.total_jobs_created += batch.jobs_created.len() as u64;
            summary.duplicates_skipped += u64::from(batch.duplicates_skipped);
        }
        self.summary = summary;
        self.status = self.derive_status();
        self.updated_at = Utc::now();

        if self.status.is_terminal() {
            if self.completed_at.is_none() {
                self.completed_at = Some(self.updated_at);
            }
        } else {
            self.completed_at = None;
        }
    }

    /// Record a committed batch and re-derive session state
    pub fn record_batch_success(
        &mut self,
        batch_number: u32,
        elements_created: Vec<Uuid>,
        jobs_created: Vec<Uuid>,
        duplicates_skipped: u32,
    ) -> Result<()> {
        self.batch_mut(batch_number)?
            .record_success(elements_created, jobs_created, duplicates_skipped);
        self.recompute();
        Ok(())
    }

    /// Record a rolled-back batch and re-derive session state
    pub fn record_batch_failure(
        &mut self,
        batch_number: u32,
        error_message: impl Into<String>,
        error_details: Option<serde_json::Value>,
    ) -> Result<()> {
        self.batch_mut(batch_number)?
            .record_failure(error_message, error_details);
        self.recompute();
        Ok(())
    }

    /// Reset a batch to pending and re-derive session state
    pub fn reset_batch(&mut self, batch_number: u32) -> Result<()> {
        self.batch_mut(batch_number)?.reset();
        self.recompute();
        Ok(())
    }

    /// Whether any batch has been processed (reached success or failed)
    pub fn has_processed_batch(&self) -> bool {
        self.batches.iter().any(|b| b.status.is_processed())
    }

    /// Numbers of batches currently awaiting processing
    pub fn pending_batch_numbers(&self) -> Vec<u32> {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Pending)
            .map(|b| b.batch_number)
            .collect()
    }

    /// Numbers of batches currently failed
    pub fn failed_batch_numbers(&self) -> Vec<u32> {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .map(|b| b.batch_number)
            .collect()
    }
}
