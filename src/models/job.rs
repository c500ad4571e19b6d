use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job lifecycle states, independent of the batch/session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Initial state when the job is generated
    Pending,
    /// Job is being worked in the field
    InProgress,
    /// Job finished
    Complete,
}

impl JobStatus {
    /// Check if the job still counts toward open work
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Job is one ordered step of a named workflow, owned by exactly one element.
///
/// `order_index` is a sparse integer key (template position × 100) so that a
/// job can later be inserted between two neighbors by midpoint arithmetic
/// without renumbering existing rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub element_id: Uuid,
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    pub title: String,
    pub order_index: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Job for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub element_id: Uuid,
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    pub title: String,
    pub order_index: i64,
}

impl Job {
    pub fn from_new(new: NewJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            element_id: new.element_id,
            project_id: new.project_id,
            subproject_id: new.subproject_id,
            title: new.title,
            order_index: new.order_index,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
