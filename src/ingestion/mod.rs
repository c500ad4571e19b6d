//! # Ingestion Engine
//!
//! The batch ingestion core: session creation and batch processing, the
//! transactional row-group writer, recovery operations, the stall sweeper,
//! the orphan sweep, and the aggregation scheduler.
//!
//! ## Core Components
//!
//! - **BatchProcessor**: claims pending batches and runs rows through the
//!   transactional writer and job generator
//! - **TransactionalWriter**: one element plus its jobs as a single atomic
//!   unit, with commit/rollback and id tracking
//! - **SessionRecovery**: cleanup, per-batch delete, session delete, and
//!   retry, each reporting what actually changed
//! - **StallSweeper**: periodic reconciliation of sessions abandoned by a
//!   crashed worker
//! - **OrphanSweeper**: on-demand deletion of crash residue that escaped a
//!   shared transaction scope
//! - **AggregationScheduler**: debounced, retrying recomputation of derived
//!   statistics for parent entities
//!
//! Every session mutation funnels through one load-apply-save path that
//! re-derives summary/status from the batch list and saves with
//! compare-and-swap, reloading and reapplying on conflict.

pub mod aggregation;
pub mod batch_processor;
pub mod orphan_sweep;
pub mod recovery;
pub mod row;
pub mod stall_sweeper;
pub mod transactional_writer;

pub use aggregation::{
    AggregationExecutor, AggregationKind, AggregationScheduler, AggregationTask,
    AggregationTaskState, StoreAggregationExecutor,
};
pub use batch_processor::{BatchOutcome, BatchProcessor, SessionRequest};
pub use orphan_sweep::{OrphanSweepReport, OrphanSweeper};
pub use recovery::{BatchDeleteReport, CleanupReport, SessionDeleteReport, SessionRecovery};
pub use row::{ElementRow, ProjectContext, RowTransformer, SpreadsheetRowTransformer};
pub use stall_sweeper::{StallSweepReport, StallSweeper, SweeperHandle};
pub use transactional_writer::{TransactionalWriter, WriterError};

use tracing::debug;
use uuid::Uuid;

use crate::error::{GirderError, Result};
use crate::models::UploadSession;
use crate::store::{DocumentStore, StoreError};

/// Load a session, apply a mutation, and save it with compare-and-swap.
///
/// On a version conflict the session is reloaded and the mutation reapplied,
/// up to `retries` additional attempts. Mutations here are per-batch and
/// commute across batches, so reapplying onto a newer copy is safe.
pub(crate) async fn persist_session_update<F>(
    store: &dyn DocumentStore,
    session_id: Uuid,
    retries: u32,
    mut apply: F,
) -> Result<UploadSession>
where
    F: FnMut(&mut UploadSession) -> Result<()>,
{
    let mut attempt = 0;
    loop {
        let mut session = store
            .find_session(session_id)
            .await?
            .ok_or_else(|| GirderError::NotFoundError(format!("session {session_id}")))?;
        apply(&mut session)?;
        match store.save_session(&session).await {
            Ok(version) => {
                session.version = version;
                return Ok(session);
            }
            Err(StoreError::Conflict(_)) if attempt < retries => {
                attempt += 1;
                debug!(
                    session_id = %session_id,
                    attempt,
                    "Session save conflict; reloading and reapplying"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
}
