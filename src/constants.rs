//! # System Constants
//!
//! Core constants and status groupings that define the operational boundaries
//! of the ingestion core: lifecycle event names, order-key spacing, and the
//! synthetic messages written by the recovery subsystem.

// Re-export status types for convenience
pub use crate::models::job::JobStatus;
pub use crate::models::upload_session::{BatchStatus, SessionStatus};

/// Lifecycle events published by the ingestion components
pub mod events {
    // Session lifecycle events
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_COMPLETED: &str = "session.completed";
    pub const SESSION_STALLED: &str = "session.stalled";
    pub const SESSION_DELETED: &str = "session.deleted";

    // Batch lifecycle events
    pub const BATCH_COMPLETED: &str = "batch.completed";
    pub const BATCH_FAILED: &str = "batch.failed";
    pub const BATCH_CLEANED: &str = "batch.cleaned";
    pub const BATCH_RETRIED: &str = "batch.retried";

    // Aggregation lifecycle events
    pub const AGGREGATION_SCHEDULED: &str = "aggregation.scheduled";
    pub const AGGREGATION_COMPLETED: &str = "aggregation.completed";
    pub const AGGREGATION_FAILED: &str = "aggregation.failed";
}

/// System-wide constants
pub mod system {
    /// Spacing between adjacent order keys generated for a workflow template.
    /// Leaves 99 integer slots between steps for later manual insertion.
    pub const ORDER_KEY_SPACING: i64 = 100;

    /// Error message stamped on batches abandoned by a crashed worker
    pub const STALL_ERROR_MESSAGE: &str = "worker stalled: no progress within staleness threshold";

    /// Version compatibility marker
    pub const GIRDER_CORE_VERSION: &str = "0.1.0";

    /// Maximum number of steps a single workflow template may declare
    pub const MAX_TEMPLATE_STEPS: usize = 100;
}

/// Status groupings for validation and logic
pub mod status_groups {
    use super::{BatchStatus, SessionStatus};

    /// Session statuses that indicate a finished ingestion run
    pub const SESSION_TERMINAL_STATES: &[SessionStatus] = &[
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::PartiallyCompleted,
    ];

    /// Batch statuses that indicate the batch has been processed
    pub const BATCH_PROCESSED_STATES: &[BatchStatus] = &[BatchStatus::Success, BatchStatus::Failed];
}
