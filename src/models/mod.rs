//! # Data Model Layer
//!
//! Persisted document types for the ingestion core. `UploadSession` embeds its
//! batch list; elements and jobs are independently addressable documents
//! referenced by id from batch accounting lists.

pub mod element;
pub mod job;
pub mod project;
pub mod upload_session;

pub use element::{Element, NewElement};
pub use job::{Job, JobStatus, NewJob};
pub use project::{AggregateStats, Project, Subproject};
pub use upload_session::{Batch, BatchStatus, SessionStatus, SessionSummary, UploadSession};
