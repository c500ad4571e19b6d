//! # Row Transformer Seam
//!
//! Spreadsheet column parsing happens upstream; this crate consumes raw row
//! objects through [`RowTransformer`], a pure mapping from a raw row plus
//! project context to a candidate element payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GirderError, Result};
use crate::models::NewElement;

/// Project linkage shared by every row of an upload session
#[derive(Debug, Clone, Copy)]
pub struct ProjectContext {
    pub project_id: Uuid,
    pub subproject_id: Option<Uuid>,
}

/// Candidate element payload produced from one raw row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRow {
    pub reference: String,
    pub name: String,
    pub workflow: Option<String>,
    pub attributes: Value,
}

impl ElementRow {
    pub fn into_new_element(self, context: &ProjectContext) -> NewElement {
        NewElement {
            project_id: context.project_id,
            subproject_id: context.subproject_id,
            reference: self.reference,
            name: self.name,
            workflow: self.workflow,
            attributes: self.attributes,
        }
    }
}

/// Pure mapping from a raw spreadsheet row to an element payload
pub trait RowTransformer: Send + Sync {
    fn transform(&self, raw: &Value, context: &ProjectContext) -> Result<ElementRow>;
}

/// Default transformer for the standard column layout: `reference` is
/// required, `name` falls back to the reference, `workflow` is optional, and
/// every remaining column is kept as an attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetRowTransformer;

impl RowTransformer for SpreadsheetRowTransformer {
    fn transform(&self, raw: &Value, _context: &ProjectContext) -> Result<ElementRow> {
        let object = raw.as_object().ok_or_else(|| {
            GirderError::ValidationError("row is not an object".to_string())
        })?;

        let reference = object
            .get("reference")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                GirderError::ValidationError("row is missing a reference".to_string())
            })?
            .to_string();

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&reference)
            .to_string();

        let workflow = object
            .get("workflow")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);

        let mut attributes = object.clone();
        attributes.remove("reference");
        attributes.remove("name");
        attributes.remove("workflow");

        Ok(ElementRow {
            reference,
            name,
            workflow,
            attributes: Value::Object(attributes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ProjectContext {
        ProjectContext {
            project_id: Uuid::new_v4(),
            subproject_id: None,
        }
    }

    #[test]
    fn test_standard_columns_map_through() {
        let row = json!({
            "reference": "BM-001",
            "name": "Beam BM-001",
            "workflow": "steel_erection",
            "grade": "S355",
        });
        let transformed = SpreadsheetRowTransformer.transform(&row, &context()).unwrap();
        assert_eq!(transformed.reference, "BM-001");
        assert_eq!(transformed.name, "Beam BM-001");
        assert_eq!(transformed.workflow.as_deref(), Some("steel_erection"));
        assert_eq!(transformed.attributes["grade"], "S355");
        assert!(transformed.attributes.get("reference").is_none());
    }

    #[test]
    fn test_name_falls_back_to_reference() {
        let row = json!({"reference": "COL-007"});
        let transformed = SpreadsheetRowTransformer.transform(&row, &context()).unwrap();
        assert_eq!(transformed.name, "COL-007");
        assert!(transformed.workflow.is_none());
    }

    #[test]
    fn test_missing_reference_is_a_validation_error() {
        let row = json!({"name": "Unnamed"});
        let result = SpreadsheetRowTransformer.transform(&row, &context());
        assert!(matches!(result, Err(GirderError::ValidationError(_))));
    }

    #[test]
    fn test_non_object_row_is_rejected() {
        let row = json!(["BM-001", "Beam"]);
        let result = SpreadsheetRowTransformer.transform(&row, &context());
        assert!(matches!(result, Err(GirderError::ValidationError(_))));
    }
}
