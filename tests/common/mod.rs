//! Shared fixtures for the integration suites
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use girder_core::cache::MemoryCache;
use girder_core::ingestion::{BatchProcessor, SessionRecovery, SessionRequest};
use girder_core::models::{Project, Subproject, UploadSession};
use girder_core::store::{DocumentStore, MemoryStore};
use girder_core::workflow::WorkflowTemplates;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub project_id: Uuid,
    pub processor: BatchProcessor,
    pub recovery: SessionRecovery,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());

        let project = Project::new("Riverside Tower");
        let project_id = project.project_id;
        store.insert_project(project).await.unwrap();

        let processor = BatchProcessor::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&cache) as Arc<dyn girder_core::cache::ReadCache>,
            WorkflowTemplates::builtin(),
        );
        let recovery = SessionRecovery::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&cache) as Arc<dyn girder_core::cache::ReadCache>,
        );

        Self {
            store,
            cache,
            project_id,
            processor,
            recovery,
        }
    }

    /// Add a subproject under the harness project
    pub async fn add_subproject(&self, name: &str) -> Uuid {
        let subproject = Subproject::new(self.project_id, name);
        let subproject_id = subproject.subproject_id;
        self.store.insert_subproject(subproject).await.unwrap();
        subproject_id
    }

    pub async fn create_session(&self, upload_id: &str, total_batches: u32) -> UploadSession {
        self.processor
            .create_session(SessionRequest {
                upload_id: upload_id.to_string(),
                project_id: self.project_id,
                subproject_id: None,
                total_batches,
            })
            .await
            .unwrap()
    }

    pub async fn project_element_count(&self) -> i64 {
        self.store
            .find_project(self.project_id)
            .await
            .unwrap()
            .unwrap()
            .element_count
    }
}

/// Rows carrying the 5-step steel erection workflow
pub fn steel_rows(prefix: &str, count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| {
            json!({
                "reference": format!("{prefix}-{i:03}"),
                "name": format!("Beam {prefix}-{i:03}"),
                "workflow": "steel_erection",
                "grade": "S355",
            })
        })
        .collect()
}

/// Rows with no workflow selector (elements only, no jobs)
pub fn bare_rows(prefix: &str, count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| {
            json!({
                "reference": format!("{prefix}-{i:03}"),
                "name": format!("Plate {prefix}-{i:03}"),
            })
        })
        .collect()
}

/// A row whose workflow selector matches no registered template,
/// guaranteed to fail its batch mid-write
pub fn poison_row(reference: &str) -> Value {
    json!({
        "reference": reference,
        "name": format!("Element {reference}"),
        "workflow": "demolition",
    })
}
