//! In-memory transactional document store.
//!
//! Collections are concurrent maps; transaction buffers are applied under a
//! store-wide commit lock so a commit is atomic with respect to other
//! commits. Session saves are compare-and-swap on the session `version`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{AggregateStats, Element, Job, Project, Subproject, UploadSession};

use super::{DocumentStore, StoreError, StoreResult, StoreTransaction};

#[derive(Default)]
struct Collections {
    projects: DashMap<Uuid, Project>,
    subprojects: DashMap<Uuid, Subproject>,
    elements: DashMap<Uuid, Element>,
    /// (project_id, reference) → element_id index backing duplicate detection
    element_refs: DashMap<(Uuid, String), Uuid>,
    jobs: DashMap<Uuid, Job>,
    sessions: DashMap<Uuid, UploadSession>,
    commit_lock: Mutex<()>,
}

/// In-memory [`DocumentStore`] implementation
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of elements currently stored (test observability)
    pub fn element_count(&self) -> usize {
        self.inner.elements.len()
    }

    /// Total number of jobs currently stored (test observability)
    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }
}

struct MemoryTransaction {
    inner: Arc<Collections>,
    elements: Vec<Element>,
    jobs: Vec<Job>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn create_element(&mut self, element: Element) {
        self.elements.push(element);
    }

    fn create_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            inner,
            elements,
            jobs,
        } = *self;
        let _guard = inner.commit_lock.lock();

        for element in &elements {
            let key = (element.project_id, element.reference.clone());
            if inner.element_refs.contains_key(&key) {
                return Err(StoreError::DuplicateKey(format!(
                    "element reference '{}' in project {}",
                    element.reference, element.project_id
                )));
            }
        }

        for element in elements {
            inner.element_refs.insert(
                (element.project_id, element.reference.clone()),
                element.element_id,
            );
            inner.elements.insert(element.element_id, element);
        }
        for job in jobs {
            inner.jobs.insert(job.job_id, job);
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        // Buffered writes are simply dropped
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            elements: Vec::new(),
            jobs: Vec::new(),
        }))
    }

    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        if self.inner.projects.contains_key(&project.project_id) {
            return Err(StoreError::DuplicateKey(format!(
                "project {}",
                project.project_id
            )));
        }
        self.inner.projects.insert(project.project_id, project);
        Ok(())
    }

    async fn find_project(&self, project_id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.inner.projects.get(&project_id).map(|p| p.clone()))
    }

    async fn adjust_project_element_count(
        &self,
        project_id: Uuid,
        delta: i64,
    ) -> StoreResult<i64> {
        let mut project = self
            .inner
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
        project.element_count += delta;
        project.updated_at = Utc::now();
        Ok(project.element_count)
    }

    async fn set_project_stats(&self, project_id: Uuid, stats: AggregateStats) -> StoreResult<()> {
        let mut project = self
            .inner
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
        project.stats = stats;
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_subproject(&self, subproject: Subproject) -> StoreResult<()> {
        if self
            .inner
            .subprojects
            .contains_key(&subproject.subproject_id)
        {
            return Err(StoreError::DuplicateKey(format!(
                "subproject {}",
                subproject.subproject_id
            )));
        }
        self.inner
            .subprojects
            .insert(subproject.subproject_id, subproject);
        Ok(())
    }

    async fn find_subproject(&self, subproject_id: Uuid) -> StoreResult<Option<Subproject>> {
        Ok(self.inner.subprojects.get(&subproject_id).map(|s| s.clone()))
    }

    async fn set_subproject_stats(
        &self,
        subproject_id: Uuid,
        stats: AggregateStats,
    ) -> StoreResult<()> {
        let mut subproject = self
            .inner
            .subprojects
            .get_mut(&subproject_id)
            .ok_or_else(|| StoreError::NotFound(format!("subproject {subproject_id}")))?;
        subproject.stats = stats;
        subproject.updated_at = Utc::now();
        Ok(())
    }

    async fn find_element(&self, element_id: Uuid) -> StoreResult<Option<Element>> {
        Ok(self.inner.elements.get(&element_id).map(|e| e.clone()))
    }

    async fn element_exists(&self, project_id: Uuid, reference: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .element_refs
            .contains_key(&(project_id, reference.to_string())))
    }

    async fn delete_elements(&self, element_ids: &[Uuid]) -> StoreResult<u64> {
        let mut deleted = 0;
        for id in element_ids {
            if let Some((_, element)) = self.inner.elements.remove(id) {
                self.inner
                    .element_refs
                    .remove(&(element.project_id, element.reference));
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn find_workflow_elements_without_jobs(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Element>> {
        let owning: HashSet<Uuid> = self.inner.jobs.iter().map(|j| j.element_id).collect();
        Ok(self
            .inner
            .elements
            .iter()
            .filter(|e| {
                e.created_at > since && e.has_workflow() && !owning.contains(&e.element_id)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        if self.inner.jobs.contains_key(&job.job_id) {
            return Err(StoreError::DuplicateKey(format!("job {}", job.job_id)));
        }
        self.inner.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn find_jobs_by_element(&self, element_id: Uuid) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.element_id == element_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.order_index);
        Ok(jobs)
    }

    async fn update_job_order(&self, job_id: Uuid, order_index: i64) -> StoreResult<()> {
        let mut job = self
            .inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        job.order_index = order_index;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_jobs(&self, job_ids: &[Uuid]) -> StoreResult<u64> {
        let mut deleted = 0;
        for id in job_ids {
            if self.inner.jobs.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn find_orphaned_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .inner
            .jobs
            .iter()
            .filter(|j| !self.inner.elements.contains_key(&j.element_id))
            .map(|j| j.clone())
            .collect())
    }

    async fn insert_session(&self, session: UploadSession) -> StoreResult<()> {
        if self.inner.sessions.contains_key(&session.session_id) {
            return Err(StoreError::DuplicateKey(format!(
                "session {}",
                session.session_id
            )));
        }
        self.inner.sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<UploadSession>> {
        Ok(self.inner.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn save_session(&self, session: &UploadSession) -> StoreResult<u64> {
        let mut stored = self
            .inner
            .sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session.session_id)))?;
        if stored.version != session.version {
            return Err(StoreError::Conflict(session.session_id));
        }
        let mut updated = session.clone();
        updated.version += 1;
        let version = updated.version;
        *stored = updated;
        Ok(version)
    }

    async fn delete_session(&self, session_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.sessions.remove(&session_id).is_some())
    }

    async fn find_stalled_sessions(
        &self,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<UploadSession>> {
        Ok(self
            .inner
            .sessions
            .iter()
            .filter(|s| s.status.is_active() && s.updated_at < updated_before)
            .map(|s| s.clone())
            .collect())
    }

    async fn project_aggregates(&self, project_id: Uuid) -> StoreResult<AggregateStats> {
        let total_elements = self
            .inner
            .elements
            .iter()
            .filter(|e| e.project_id == project_id)
            .count() as u64;
        let (total_jobs, open_jobs) = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.project_id == project_id)
            .fold((0u64, 0u64), |(total, open), j| {
                (total + 1, open + u64::from(j.status.is_open()))
            });
        Ok(AggregateStats {
            total_elements,
            total_jobs,
            open_jobs,
            refreshed_at: Some(Utc::now()),
        })
    }

    async fn subproject_aggregates(&self, subproject_id: Uuid) -> StoreResult<AggregateStats> {
        let total_elements = self
            .inner
            .elements
            .iter()
            .filter(|e| e.subproject_id == Some(subproject_id))
            .count() as u64;
        let (total_jobs, open_jobs) = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.subproject_id == Some(subproject_id))
            .fold((0u64, 0u64), |(total, open), j| {
                (total + 1, open + u64::from(j.status.is_open()))
            });
        Ok(AggregateStats {
            total_elements,
            total_jobs,
            open_jobs,
            refreshed_at: Some(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewElement, NewJob};
    use serde_json::json;

    fn sample_element(project_id: Uuid, reference: &str) -> Element {
        Element::from_new(NewElement {
            project_id,
            subproject_id: None,
            reference: reference.to_string(),
            name: format!("Element {reference}"),
            workflow: None,
            attributes: json!({}),
        })
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let element = sample_element(project_id, "BM-001");
        let element_id = element.element_id;

        let mut tx = store.begin().await.unwrap();
        tx.create_element(element.clone());
        tx.create_job(Job::from_new(NewJob {
            element_id,
            project_id,
            subproject_id: None,
            title: "Erection".to_string(),
            order_index: 100,
        }));

        // Nothing visible before commit
        assert!(store.find_element(element_id).await.unwrap().is_none());

        tx.commit().await.unwrap();

        assert!(store.find_element(element_id).await.unwrap().is_some());
        assert_eq!(store.find_jobs_by_element(element_id).await.unwrap().len(), 1);
        assert!(store.element_exists(project_id, "BM-001").await.unwrap());
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = MemoryStore::new();
        let element = sample_element(Uuid::new_v4(), "BM-002");
        let element_id = element.element_id;

        let mut tx = store.begin().await.unwrap();
        tx.create_element(element);
        tx.abort().await.unwrap();

        assert!(store.find_element(element_id).await.unwrap().is_none());
        assert_eq!(store.element_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_reference() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.create_element(sample_element(project_id, "BM-003"));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_element(sample_element(project_id, "BM-003"));
        let result = tx.commit().await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.element_count(), 1);
    }

    #[tokio::test]
    async fn test_save_session_detects_version_conflict() {
        let store = MemoryStore::new();
        let session = UploadSession::new("upload-1", Uuid::new_v4(), None, 2).unwrap();
        let session_id = session.session_id;
        store.insert_session(session).await.unwrap();

        let mut copy_a = store.find_session(session_id).await.unwrap().unwrap();
        let copy_b = store.find_session(session_id).await.unwrap().unwrap();

        copy_a.recompute();
        let version = store.save_session(&copy_a).await.unwrap();
        assert_eq!(version, 1);

        let result = store.save_session(&copy_b).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_adjust_project_counter_is_relative() {
        let store = MemoryStore::new();
        let project = Project::new("Riverside Tower");
        let project_id = project.project_id;
        store.insert_project(project).await.unwrap();

        assert_eq!(
            store.adjust_project_element_count(project_id, 5).await.unwrap(),
            5
        );
        assert_eq!(
            store.adjust_project_element_count(project_id, -2).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_stalled_session_query_filters_by_status_and_age() {
        let store = MemoryStore::new();

        let mut stale = UploadSession::new("stale", Uuid::new_v4(), None, 1).unwrap();
        stale.status = crate::models::SessionStatus::InProgress;
        stale.updated_at = Utc::now() - chrono::Duration::minutes(10);
        let stale_id = stale.session_id;
        store.insert_session(stale).await.unwrap();

        let mut fresh = UploadSession::new("fresh", Uuid::new_v4(), None, 1).unwrap();
        fresh.status = crate::models::SessionStatus::InProgress;
        store.insert_session(fresh).await.unwrap();

        let pending = UploadSession::new("pending", Uuid::new_v4(), None, 1).unwrap();
        store.insert_session(pending).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(2);
        let stalled = store.find_stalled_sessions(cutoff).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].session_id, stale_id);
    }
}
