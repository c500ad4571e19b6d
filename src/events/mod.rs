//! # Event System
//!
//! Broadcast-based lifecycle event publishing for ingestion observability.
//! Event names are defined in [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
