use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived statistics for a project or subproject, written only by the
/// aggregation executor (the explicit reconciliation path).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_elements: u64,
    pub total_jobs: u64,
    pub open_jobs: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Project owning elements, jobs, and upload sessions.
///
/// `element_count` is the denormalized counter visible to list endpoints; it
/// is mutated only through relative increments/decrements at the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: Uuid,
    pub name: String,
    pub element_count: i64,
    pub stats: AggregateStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: Uuid::new_v4(),
            name: name.into(),
            element_count: 0,
            stats: AggregateStats::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Subproject partition of a project (e.g. one building phase)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subproject {
    pub subproject_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub stats: AggregateStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subproject {
    pub fn new(project_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            subproject_id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            stats: AggregateStats::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
