use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Element is the primary record derived from one spreadsheet row:
/// a structural asset owned by a project, optionally partitioned into a
/// subproject, optionally carrying a named workflow selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub element_id: Uuid,
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    /// Asset tag from the source row; unique per project, used for duplicate
    /// detection on re-submission.
    pub reference: String,
    pub name: String,
    pub workflow: Option<String>,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Element for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewElement {
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
    pub reference: String,
    pub name: String,
    pub workflow: Option<String>,
    pub attributes: serde_json::Value,
}

impl Element {
    pub fn from_new(new: NewElement) -> Self {
        let now = Utc::now();
        Self {
            element_id: Uuid::new_v4(),
            project_id: new.project_id,
            subproject_id: new.subproject_id,
            reference: new.reference,
            name: new.name,
            workflow: new.workflow,
            attributes: new.attributes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this element declares a workflow and therefore owns jobs
    pub fn has_workflow(&self) -> bool {
        self.workflow.as_deref().is_some_and(|w| !w.is_empty())
    }
}
