//! Aggregation scheduler integration tests against the store-backed executor

mod common;

use std::sync::Arc;

use anyhow::Result;
use girder_core::config::GirderConfig;
use girder_core::ingestion::{AggregationScheduler, BatchProcessor, SessionRequest};
use girder_core::store::DocumentStore;
use girder_core::workflow::WorkflowTemplates;

use common::{steel_rows, Harness};

fn fast_config() -> GirderConfig {
    GirderConfig {
        aggregation_debounce_ms: 50,
        aggregation_backoff_base_ms: 10,
        ..GirderConfig::default()
    }
}

#[tokio::test]
async fn test_store_executor_recomputes_project_stats() -> Result<()> {
    let harness = Harness::new().await;
    let session = harness.create_session("upload-301", 1).await;
    harness
        .processor
        .process_batch(session.session_id, 1, &steel_rows("BM", 3))
        .await?;

    let scheduler = AggregationScheduler::for_store(
        Arc::clone(&harness.store) as Arc<dyn DocumentStore>,
        &fast_config(),
    );
    let worker = scheduler.spawn();

    scheduler.schedule_project(harness.project_id);
    scheduler.drain().await;

    let project = harness
        .store
        .find_project(harness.project_id)
        .await?
        .unwrap();
    assert_eq!(project.stats.total_elements, 3);
    assert_eq!(project.stats.total_jobs, 15);
    assert_eq!(project.stats.open_jobs, 15);
    assert!(project.stats.refreshed_at.is_some());

    scheduler.shutdown();
    let _ = worker.await;
    Ok(())
}

#[tokio::test]
async fn test_batch_completion_triggers_debounced_aggregation() -> Result<()> {
    let harness = Harness::new().await;
    let subproject_id = harness.add_subproject("Phase 1").await;

    let scheduler = AggregationScheduler::for_store(
        Arc::clone(&harness.store) as Arc<dyn DocumentStore>,
        &fast_config(),
    );
    let worker = scheduler.spawn();

    let processor = BatchProcessor::new(
        Arc::clone(&harness.store) as Arc<dyn DocumentStore>,
        Arc::clone(&harness.cache) as Arc<dyn girder_core::cache::ReadCache>,
        WorkflowTemplates::builtin(),
    )
    .with_scheduler(scheduler.clone());

    let session = processor
        .create_session(SessionRequest {
            upload_id: "upload-302".into(),
            project_id: harness.project_id,
            subproject_id: Some(subproject_id),
            total_batches: 2,
        })
        .await?;

    // Two batches complete close together; the debounce window coalesces
    // their subproject recomputations into one effective task
    processor
        .process_batch(session.session_id, 1, &steel_rows("BM", 2))
        .await?;
    processor
        .process_batch(session.session_id, 2, &steel_rows("CL", 2))
        .await?;

    scheduler.drain().await;

    let subproject = harness
        .store
        .find_subproject(subproject_id)
        .await?
        .unwrap();
    assert_eq!(subproject.stats.total_elements, 4);
    assert_eq!(subproject.stats.total_jobs, 20);

    let project = harness
        .store
        .find_project(harness.project_id)
        .await?
        .unwrap();
    assert_eq!(project.stats.total_elements, 4);

    scheduler.shutdown();
    let _ = worker.await;
    Ok(())
}

#[tokio::test]
async fn test_scheduling_does_not_block_batch_completion() -> Result<()> {
    let harness = Harness::new().await;

    // No worker is running: scheduling must still return immediately and the
    // batch completion path must not wait on the queue.
    let scheduler = AggregationScheduler::for_store(
        Arc::clone(&harness.store) as Arc<dyn DocumentStore>,
        &GirderConfig::default(),
    );

    let processor = BatchProcessor::new(
        Arc::clone(&harness.store) as Arc<dyn DocumentStore>,
        Arc::clone(&harness.cache) as Arc<dyn girder_core::cache::ReadCache>,
        WorkflowTemplates::builtin(),
    )
    .with_scheduler(scheduler.clone());

    let session = processor
        .create_session(SessionRequest {
            upload_id: "upload-303".into(),
            project_id: harness.project_id,
            subproject_id: None,
            total_batches: 1,
        })
        .await?;
    let outcome = processor
        .process_batch(session.session_id, 1, &steel_rows("BM", 1))
        .await?;
    assert_eq!(outcome.elements_created, 1);

    // The task is queued, awaiting a worker
    assert!(!scheduler.is_idle());
    Ok(())
}
