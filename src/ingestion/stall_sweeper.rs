//! # Stall Sweeper
//!
//! Periodic background task that detects sessions abandoned by a crashed
//! worker and reconciles them into an accurate terminal state. The sweep
//! never deletes documents; it only marks pending batches failed and
//! recomputes session status so operators can see the truth and issue
//! retries.
//!
//! Saves are compare-and-swap on the session version: a conflict means the
//! worker is in fact alive, so the session is skipped for that cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::config::GirderConfig;
use crate::constants::events;
use crate::constants::system::STALL_ERROR_MESSAGE;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::store::{DocumentStore, StoreError};

/// Counts from one sweep pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StallSweepReport {
    /// Sessions matching the staleness query
    pub sessions_examined: usize,
    /// Sessions whose pending batches were marked failed
    pub sessions_stalled: usize,
    /// Pending batches marked failed across all sessions
    pub batches_marked: u64,
    /// Sessions with no pending batches whose terminal state was rewritten
    pub sessions_reconciled: usize,
    /// Sessions skipped because a concurrent save proved the worker alive
    pub sessions_skipped: usize,
}

/// Handle to a spawned sweeper loop
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// StallSweeper reconciles sessions stuck `in_progress` with no recent
/// progress
pub struct StallSweeper {
    store: Arc<dyn DocumentStore>,
    events: EventPublisher,
    sweep_interval: Duration,
    startup_delay: Duration,
    stall_threshold: chrono::Duration,
}

impl StallSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, config: &GirderConfig) -> Self {
        Self {
            store,
            events: EventPublisher::default(),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            startup_delay: Duration::from_secs(config.startup_sweep_delay_secs),
            stall_threshold: chrono::Duration::seconds(config.stall_threshold_secs),
        }
    }

    /// Attach a custom event publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Spawn the periodic loop: one sweep shortly after start, then one per
    /// interval.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(self.startup_delay) => {}
                _ = shutdown_rx.changed() => return,
            }
            if let Err(err) = self.sweep_once().await {
                error!(error = %err, "Startup stall sweep failed");
            }

            let start = tokio::time::Instant::now() + self.sweep_interval;
            let mut ticker = tokio::time::interval_at(start, self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            error!(error = %err, "Stall sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        SweeperHandle { shutdown, handle }
    }

    /// Run one sweep pass over every stalled session
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<StallSweepReport> {
        let cutoff = Utc::now() - self.stall_threshold;
        let stalled = self.store.find_stalled_sessions(cutoff).await?;

        let mut report = StallSweepReport {
            sessions_examined: stalled.len(),
            ..StallSweepReport::default()
        };

        for mut session in stalled {
            let session_id = session.session_id;
            let last_progress_at = session.updated_at;
            let pending = session.pending_batch_numbers();
            let never_processed = !session.has_processed_batch();

            if pending.is_empty() {
                // Processing finished but the terminal state was never
                // written; rewrite summary/status from the batches.
                session.recompute();
                match self.store.save_session(&session).await {
                    Ok(_) => {
                        report.sessions_reconciled += 1;
                        info!(
                            session_id = %session_id,
                            status = %session.status,
                            "Reconciled session whose terminal state was never written"
                        );
                    }
                    Err(StoreError::Conflict(_)) => report.sessions_skipped += 1,
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "Sweep save failed");
                        report.sessions_skipped += 1;
                    }
                }
                continue;
            }

            let details = json!({
                "detected_at": Utc::now(),
                "last_progress_at": last_progress_at,
            });
            for batch_number in &pending {
                session.record_batch_failure(
                    *batch_number,
                    STALL_ERROR_MESSAGE,
                    Some(details.clone()),
                )?;
            }

            match self.store.save_session(&session).await {
                Ok(_) => {
                    report.sessions_stalled += 1;
                    report.batches_marked += pending.len() as u64;
                    let _ = self
                        .events
                        .publish_for_session(
                            events::SESSION_STALLED,
                            session_id,
                            json!({
                                "batches_marked": &pending,
                                "status": session.status,
                                "never_processed": never_processed,
                            }),
                        )
                        .await;
                    warn!(
                        session_id = %session_id,
                        batches = pending.len(),
                        status = %session.status,
                        never_processed,
                        "Marked stalled session batches failed"
                    );
                }
                Err(StoreError::Conflict(_)) => {
                    // The worker committed something after our read; it is
                    // alive, leave the session alone this cycle.
                    report.sessions_skipped += 1;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Sweep save failed");
                    report.sessions_skipped += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchStatus, SessionStatus, UploadSession};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn sweeper(store: Arc<MemoryStore>) -> StallSweeper {
        StallSweeper::new(store, &GirderConfig::default())
    }

    async fn insert_stalled_session(
        store: &MemoryStore,
        batch_statuses: &[BatchStatus],
    ) -> Uuid {
        let mut session = UploadSession::new(
            "stalled-upload",
            Uuid::new_v4(),
            None,
            batch_statuses.len() as u32,
        )
        .unwrap();
        for (batch, status) in session.batches.iter_mut().zip(batch_statuses) {
            batch.status = *status;
        }
        session.status = SessionStatus::InProgress;
        session.updated_at = Utc::now() - chrono::Duration::minutes(3);
        let id = session.session_id;
        store.insert_session(session).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_all_pending_session_is_marked_failed() {
        let store = Arc::new(MemoryStore::new());
        let session_id = insert_stalled_session(
            &store,
            &[BatchStatus::Pending, BatchStatus::Pending, BatchStatus::Pending],
        )
        .await;

        let report = sweeper(Arc::clone(&store)).sweep_once().await.unwrap();
        assert_eq!(report.sessions_stalled, 1);
        assert_eq!(report.batches_marked, 3);

        let session = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.completed_at.is_some());
        for batch in &session.batches {
            assert_eq!(batch.status, BatchStatus::Failed);
            assert!(batch
                .error_message
                .as_deref()
                .unwrap()
                .contains("worker stalled"));
        }
    }

    #[tokio::test]
    async fn test_partial_progress_becomes_partially_completed() {
        let store = Arc::new(MemoryStore::new());
        let session_id = insert_stalled_session(
            &store,
            &[BatchStatus::Success, BatchStatus::Pending, BatchStatus::Pending],
        )
        .await;

        sweeper(Arc::clone(&store)).sweep_once().await.unwrap();

        let session = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::PartiallyCompleted);
        assert_eq!(session.summary.successful_batches, 1);
        assert_eq!(session.summary.failed_batches, 2);
        assert_eq!(session.batch(1).unwrap().status, BatchStatus::Success);
    }

    #[tokio::test]
    async fn test_finished_session_with_unwritten_terminal_state_is_reconciled() {
        let store = Arc::new(MemoryStore::new());
        let session_id = insert_stalled_session(
            &store,
            &[BatchStatus::Success, BatchStatus::Success],
        )
        .await;

        let report = sweeper(Arc::clone(&store)).sweep_once().await.unwrap();
        assert_eq!(report.sessions_reconciled, 1);
        assert_eq!(report.batches_marked, 0);

        let session = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_fresh_sessions_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let mut session = UploadSession::new("fresh", Uuid::new_v4(), None, 2).unwrap();
        session.status = SessionStatus::InProgress;
        let session_id = session.session_id;
        store.insert_session(session).await.unwrap();

        let report = sweeper(Arc::clone(&store)).sweep_once().await.unwrap();
        assert_eq!(report.sessions_examined, 0);

        let session = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.batch(1).unwrap().status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops_cleanly() {
        let store = Arc::new(MemoryStore::new());
        let handle = sweeper(store).spawn();
        handle.stop().await;
    }
}
