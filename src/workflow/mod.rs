//! # Workflow Templates
//!
//! A named workflow maps to a fixed ordered list of step titles. The job
//! generator expands a template into ordered jobs for one element; templates
//! themselves are static configuration, registered at startup.

pub mod job_generator;

use std::collections::HashMap;

pub use job_generator::JobGenerator;

use crate::constants::system::MAX_TEMPLATE_STEPS;
use crate::error::{GirderError, Result};

/// Registry of named workflow templates
#[derive(Debug, Clone, Default)]
pub struct WorkflowTemplates {
    templates: HashMap<String, Vec<String>>,
}

impl WorkflowTemplates {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the standard construction workflows
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                "steel_erection",
                &[
                    "Fabrication Review",
                    "Delivery",
                    "Erection",
                    "Plumb & Align",
                    "Final Inspection",
                ],
            )
            .expect("builtin template is valid");
        registry
            .register(
                "concrete_pour",
                &[
                    "Formwork",
                    "Rebar Inspection",
                    "Pour",
                    "Cure & Strip",
                    "Surface Finish",
                ],
            )
            .expect("builtin template is valid");
        registry
            .register(
                "mep_rough_in",
                &["Layout", "Rough-In", "Pressure Test", "Cover Inspection"],
            )
            .expect("builtin template is valid");
        registry
    }

    /// Register a named template with its ordered step titles
    pub fn register(&mut self, name: impl Into<String>, steps: &[&str]) -> Result<()> {
        let name = name.into();
        if steps.is_empty() {
            return Err(GirderError::ValidationError(format!(
                "workflow '{name}' must declare at least one step"
            )));
        }
        if steps.len() > MAX_TEMPLATE_STEPS {
            return Err(GirderError::ValidationError(format!(
                "workflow '{name}' exceeds {MAX_TEMPLATE_STEPS} steps"
            )));
        }
        self.templates
            .insert(name, steps.iter().map(|s| s.to_string()).collect());
        Ok(())
    }

    /// Ordered step titles for a named workflow, if registered
    pub fn steps(&self, name: &str) -> Option<&[String]> {
        self.templates.get(name).map(|s| s.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered workflow names
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(|k| k.as_str()).collect()
    }
}
