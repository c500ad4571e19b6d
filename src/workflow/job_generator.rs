//! # Ordered Job Generator
//!
//! Expands a named workflow template into ordered jobs for one element.
//! Order keys are sparse (`position * 100`), leaving 99 integer slots between
//! adjacent steps so a job can later be inserted by midpoint arithmetic. When
//! an interval is exhausted, the element's jobs are renumbered back to
//! multiples of the spacing and the insertion retried.

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::constants::system::ORDER_KEY_SPACING;
use crate::error::{GirderError, Result};
use crate::ingestion::transactional_writer::TransactionalWriter;
use crate::models::{Element, Job, NewJob};
use crate::store::DocumentStore;

use super::WorkflowTemplates;

/// Generates the ordered job sequence for elements carrying a workflow
/// selector
#[derive(Debug, Clone)]
pub struct JobGenerator {
    templates: WorkflowTemplates,
}

impl JobGenerator {
    pub fn new(templates: WorkflowTemplates) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &WorkflowTemplates {
        &self.templates
    }

    /// Produce the fixed ordered template of jobs for an element, buffered
    /// into the caller's transaction.
    ///
    /// An element without a workflow selector yields an empty sequence; a
    /// selector that matches no registered template is `UnknownWorkflow`.
    pub fn generate(
        &self,
        writer: &mut TransactionalWriter,
        element: &Element,
    ) -> Result<Vec<Uuid>> {
        let Some(workflow) = element.workflow.as_deref().filter(|w| !w.is_empty()) else {
            return Ok(Vec::new());
        };

        let steps = self
            .templates
            .steps(workflow)
            .ok_or_else(|| GirderError::UnknownWorkflow(workflow.to_string()))?;

        let mut job_ids = Vec::with_capacity(steps.len());
        for (position, title) in steps.iter().enumerate() {
            let job = Job::from_new(NewJob {
                element_id: element.element_id,
                project_id: element.project_id,
                subproject_id: element.subproject_id,
                title: title.clone(),
                order_index: (position as i64 + 1) * ORDER_KEY_SPACING,
            });
            job_ids.push(writer.create_job(job)?);
        }

        debug!(
            element_id = %element.element_id,
            workflow = %workflow,
            jobs = job_ids.len(),
            "Generated ordered jobs from workflow template"
        );
        Ok(job_ids)
    }

    /// Insert a job immediately after an existing one, choosing the integer
    /// midpoint of the surrounding order keys.
    ///
    /// When the interval between the anchor and its successor has no integer
    /// midpoint left, every job of the element is renumbered back to
    /// multiples of the spacing (order preserved) and the midpoint retried.
    #[instrument(skip(self, store))]
    pub async fn insert_after(
        &self,
        store: &dyn DocumentStore,
        element_id: Uuid,
        after_job_id: Uuid,
        title: &str,
    ) -> Result<Job> {
        let element = store
            .find_element(element_id)
            .await?
            .ok_or_else(|| GirderError::NotFoundError(format!("element {element_id}")))?;

        let mut jobs = store.find_jobs_by_element(element_id).await?;
        let anchor = jobs
            .iter()
            .position(|j| j.job_id == after_job_id)
            .ok_or_else(|| {
                GirderError::NotFoundError(format!(
                    "job {after_job_id} on element {element_id}"
                ))
            })?;

        let order_index = match Self::midpoint(&jobs, anchor) {
            Some(index) => index,
            None => {
                debug!(
                    element_id = %element_id,
                    "Order-key interval exhausted; renumbering element jobs"
                );
                for (position, job) in jobs.iter_mut().enumerate() {
                    let index = (position as i64 + 1) * ORDER_KEY_SPACING;
                    if job.order_index != index {
                        store.update_job_order(job.job_id, index).await?;
                        job.order_index = index;
                    }
                }
                Self::midpoint(&jobs, anchor).ok_or_else(|| {
                    GirderError::InvalidStateError(format!(
                        "no order-key slot after renumbering element {element_id}"
                    ))
                })?
            }
        };

        let job = Job::from_new(NewJob {
            element_id,
            project_id: element.project_id,
            subproject_id: element.subproject_id,
            title: title.to_string(),
            order_index,
        });
        store.insert_job(job.clone()).await?;
        Ok(job)
    }

    /// Integer midpoint between the anchor job's key and its successor's,
    /// or `anchor + spacing` when the anchor is last. `None` when the
    /// interval has no integer midpoint left.
    fn midpoint(jobs: &[Job], anchor: usize) -> Option<i64> {
        let lower = jobs[anchor].order_index;
        match jobs.get(anchor + 1) {
            Some(next) => {
                let upper = next.order_index;
                if upper - lower >= 2 {
                    Some(lower + (upper - lower) / 2)
                } else {
                    None
                }
            }
            None => Some(lower + ORDER_KEY_SPACING),
        }
    }
}
