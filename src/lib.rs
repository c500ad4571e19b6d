#![allow(clippy::doc_markdown)] // Allow technical terms like DashMap, Tokio in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Girder Core
//!
//! Batch ingestion core for engineering-asset datasets.
//!
//! ## Overview
//!
//! Girder Core converts spreadsheet-derived asset rows (thousands per upload)
//! into persisted elements plus ordered jobs derived from named workflows,
//! inside durable upload sessions that tolerate partial failure, worker
//! crashes, and duplicate submissions.
//!
//! ## Architecture
//!
//! Session **status and summary are always derived** from batch outcomes —
//! every mutating operation ends by recomputing them from the batch list and
//! persisting the whole session document with compare-and-swap. Each
//! row-group (one element plus its jobs) is written under a single atomic
//! store transaction; nothing partial is ever visible.
//!
//! ## Module Organization
//!
//! - [`models`] - Persisted document types: sessions, batches, elements,
//!   jobs, projects
//! - [`store`] - Transactional document-store seam plus the in-memory
//!   implementation
//! - [`workflow`] - Named workflow templates and the ordered job generator
//! - [`ingestion`] - Batch processor, transactional writer, recovery, stall
//!   sweeper, orphan sweep, aggregation scheduler
//! - [`events`] - Lifecycle event publishing
//! - [`cache`] - Read-cache invalidation seam
//! - [`config`] - Environment-driven configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use girder_core::cache::MemoryCache;
//! use girder_core::ingestion::{BatchProcessor, SessionRequest};
//! use girder_core::models::Project;
//! use girder_core::store::{DocumentStore, MemoryStore};
//! use girder_core::workflow::WorkflowTemplates;
//! use serde_json::json;
//!
//! # async fn example() -> girder_core::Result<()> {
//! let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
//! let cache = Arc::new(MemoryCache::new());
//!
//! let project = Project::new("Riverside Tower");
//! let project_id = project.project_id;
//! store.insert_project(project).await?;
//!
//! let processor = BatchProcessor::new(store, cache, WorkflowTemplates::builtin());
//! let session = processor
//!     .create_session(SessionRequest {
//!         upload_id: "upload-2024-001".into(),
//!         project_id,
//!         subproject_id: None,
//!         total_batches: 1,
//!     })
//!     .await?;
//!
//! let rows = vec![json!({
//!     "reference": "BM-001",
//!     "name": "Beam BM-001",
//!     "workflow": "steel_erection",
//! })];
//! let outcome = processor.process_batch(session.session_id, 1, &rows).await?;
//! println!("created {} elements", outcome.elements_created);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! The suites run entirely against the in-memory store:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod logging;
pub mod models;
pub mod store;
pub mod workflow;

pub use config::GirderConfig;
pub use constants::{status_groups, system};
// Re-export constants events with a distinct name to avoid clashing with the
// events module
pub use constants::events as system_events;
pub use error::{GirderError, Result};
pub use ingestion::{
    AggregationScheduler, BatchOutcome, BatchProcessor, OrphanSweeper, SessionRecovery,
    SessionRequest, StallSweeper, TransactionalWriter,
};
pub use models::{
    AggregateStats, Batch, BatchStatus, Element, Job, JobStatus, Project, SessionStatus,
    SessionSummary, Subproject, UploadSession,
};
pub use store::{DocumentStore, MemoryStore, StoreError, StoreTransaction};
pub use workflow::{JobGenerator, WorkflowTemplates};
