//! # Read-Cache Invalidation Seam
//!
//! Cached read endpoints (element lists, project counts) live outside this
//! crate; ingestion only needs to tell them when counts or element sets
//! changed. Every operation that mutates counts calls
//! [`ReadCache::invalidate`] with a key prefix.

use dashmap::DashMap;

/// Invalidation interface to the external read-cache layer
pub trait ReadCache: Send + Sync {
    /// Invalidate every cached entry under the given key or prefix
    fn invalidate(&self, prefix: &str);
}

/// Cache that records invalidations, used in tests and as a default when no
/// external cache layer is wired in
#[derive(Debug, Default)]
pub struct MemoryCache {
    invalidations: DashMap<String, u64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invalidations recorded for a prefix
    pub fn invalidation_count(&self, prefix: &str) -> u64 {
        self.invalidations.get(prefix).map(|c| *c).unwrap_or(0)
    }
}

impl ReadCache for MemoryCache {
    fn invalidate(&self, prefix: &str) {
        *self.invalidations.entry(prefix.to_string()).or_insert(0) += 1;
    }
}

/// Cache that ignores invalidations
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ReadCache for NoopCache {
    fn invalidate(&self, _prefix: &str) {}
}

/// Cache key prefix for a project's cached reads
pub fn project_prefix(project_id: uuid::Uuid) -> String {
    format!("project:{project_id}")
}

/// Cache key prefix for a subproject's cached reads
pub fn subproject_prefix(subproject_id: uuid::Uuid) -> String {
    format!("subproject:{subproject_id}")
}
