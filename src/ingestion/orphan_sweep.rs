//! # Orphan Sweep
//!
//! Crash-recovery pass for writes that escaped a shared transaction scope:
//! elements that declare a workflow but own zero jobs (a process died between
//! record-write and job generation) and jobs whose owning element is gone.
//! Run on demand or at process start.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::store::DocumentStore;

/// Counts of what the sweep actually deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanSweepReport {
    pub since: DateTime<Utc>,
    pub elements_deleted: u64,
    pub jobs_deleted: u64,
}

/// OrphanSweeper deletes evidence of crashed row-group writes
pub struct OrphanSweeper {
    store: Arc<dyn DocumentStore>,
}

impl OrphanSweeper {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Sweep elements created after `since` that declare a workflow but own
    /// no jobs, then jobs without an owning element.
    #[instrument(skip(self))]
    pub async fn sweep(&self, since: DateTime<Utc>) -> Result<OrphanSweepReport> {
        let orphaned_elements = self
            .store
            .find_workflow_elements_without_jobs(since)
            .await?;

        // Counter decrements are per-project
        let mut by_project: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for element in &orphaned_elements {
            by_project
                .entry(element.project_id)
                .or_default()
                .push(element.element_id);
        }

        let mut elements_deleted = 0u64;
        for (project_id, element_ids) in by_project {
            let deleted = self.store.delete_elements(&element_ids).await?;
            if deleted > 0 {
                self.store
                    .adjust_project_element_count(project_id, -(deleted as i64))
                    .await?;
            }
            elements_deleted += deleted;
        }

        let orphaned_jobs = self.store.find_orphaned_jobs().await?;
        let job_ids: Vec<Uuid> = orphaned_jobs.iter().map(|j| j.job_id).collect();
        let jobs_deleted = if job_ids.is_empty() {
            0
        } else {
            self.store.delete_jobs(&job_ids).await?
        };

        if elements_deleted > 0 || jobs_deleted > 0 {
            info!(
                elements_deleted,
                jobs_deleted,
                "Orphan sweep removed crash residue"
            );
        }

        Ok(OrphanSweepReport {
            since,
            elements_deleted,
            jobs_deleted,
        })
    }
}
