//! Integration tests for the worker pool

mod common;

use std::collections::HashSet;
use std::time::Duration;

use arena_core::EngineConfig;
use arena_pool::{PoolConfig, PoolEvent, TaskId, WorkerError, WorkerPool, WorkerStatus};

use common::{failing_factory, matchup_task, scripted_factory, sluggish_factory};

fn config(size: usize) -> PoolConfig {
    PoolConfig::new(size, EngineConfig::default()).with_init_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_busy_workers_never_exceed_pool_size() {
    let pool = WorkerPool::initialize(scripted_factory(), config(2))
        .await
        .unwrap();

    let tasks = (0..5).map(|i| matchup_task(i, "steady", 3)).collect();
    let outcomes = pool.submit(tasks).wait().await.unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.is_success()));
    let ids: HashSet<TaskId> = outcomes.iter().map(|o| o.task_id).collect();
    assert_eq!(ids.len(), 5);

    assert!(pool.metrics().peak_busy() <= 2);
    assert!(pool.metrics().peak_busy() >= 1);
    assert_eq!(pool.metrics().busy(), 0);
    assert_eq!(pool.metrics().completed_tasks(), 5);
}

#[tokio::test]
async fn test_progress_counts_every_match() {
    let pool = WorkerPool::initialize(scripted_factory(), config(3))
        .await
        .unwrap();

    let tasks = (0..4).map(|i| matchup_task(i, "steady", 5)).collect();
    let mut submission = pool.submit(tasks);
    assert_eq!(submission.total_units(), 20);

    let mut last = 0;
    let mut finished = 0;
    while let Some(event) = submission.next_event().await {
        match event {
            PoolEvent::MatchCompleted {
                completed, total, ..
            } => {
                assert_eq!(total, 20);
                assert!(completed > last, "progress only moves forward");
                last = completed;
            }
            PoolEvent::TaskFinished(outcome) => {
                assert_eq!(outcome.matches().len(), 5);
                finished += 1;
            }
        }
    }
    assert_eq!(last, 20);
    assert_eq!(finished, 4);
    assert_eq!(submission.wait().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_task_error_does_not_cancel_others() {
    let pool = WorkerPool::initialize(scripted_factory(), config(2))
        .await
        .unwrap();

    let tasks = vec![
        matchup_task(0, "steady", 2),
        matchup_task(1, "error", 2),
        matchup_task(2, "steady", 2),
    ];
    let outcomes = pool.submit(tasks).wait().await.unwrap();
    assert_eq!(outcomes.len(), 3);

    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task_id, TaskId(1));
    assert!(matches!(
        failed[0].result.as_ref().unwrap_err().root_cause(),
        WorkerError::Compute(_)
    ));
    assert_eq!(pool.metrics().live_workers(), 2);
}

#[tokio::test]
async fn test_crashed_worker_is_removed_and_its_task_fails() {
    let pool = WorkerPool::initialize(scripted_factory(), config(2))
        .await
        .unwrap();

    let tasks = vec![
        matchup_task(0, "panic", 2),
        matchup_task(1, "steady", 2),
        matchup_task(2, "steady", 2),
        matchup_task(3, "steady", 2),
    ];
    let outcomes = pool.submit(tasks).wait().await.unwrap();
    assert_eq!(outcomes.len(), 4);

    let crashed = outcomes
        .iter()
        .find(|o| o.task_id == TaskId(0))
        .unwrap();
    assert!(matches!(
        crashed.result.as_ref().unwrap_err().root_cause(),
        WorkerError::WorkerCrashed(_)
    ));
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 3);

    assert_eq!(pool.metrics().live_workers(), 1);
    let status = pool.status().await.unwrap();
    let crashed_slots = status
        .iter()
        .filter(|(_, s)| *s == WorkerStatus::Crashed)
        .count();
    assert_eq!(crashed_slots, 1);
}

#[tokio::test]
async fn test_all_workers_crashing_still_resolves() {
    let pool = WorkerPool::initialize(scripted_factory(), config(2))
        .await
        .unwrap();

    let tasks = (0..6).map(|i| matchup_task(i, "panic", 1)).collect();
    let outcomes = tokio::time::timeout(Duration::from_secs(10), pool.submit(tasks).wait())
        .await
        .expect("submission resolves")
        .unwrap();

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(|o| !o.is_success()));
    let no_workers = outcomes
        .iter()
        .filter(|o| o.result.as_ref().unwrap_err().root_cause() == &WorkerError::NoWorkers)
        .count();
    assert_eq!(no_workers, 4);
    assert_eq!(pool.metrics().live_workers(), 0);

    // Later submissions fail fast rather than hang
    let late = pool.submit(vec![matchup_task(9, "steady", 1)]).wait().await.unwrap();
    assert_eq!(
        late[0].result.as_ref().unwrap_err().root_cause(),
        &WorkerError::NoWorkers
    );
}

#[tokio::test]
async fn test_terminate_abandons_open_submissions() {
    let pool = WorkerPool::initialize(scripted_factory(), config(1))
        .await
        .unwrap();

    let submission = pool.submit(vec![matchup_task(0, "slow", 1), matchup_task(1, "slow", 1)]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.terminate().await;

    assert_eq!(submission.wait().await.unwrap_err(), WorkerError::Terminated);
    assert_eq!(
        pool.submit(vec![matchup_task(2, "steady", 1)]).wait().await.unwrap_err(),
        WorkerError::Terminated
    );
}

#[tokio::test]
async fn test_repeated_task_id_still_yields_one_outcome_per_task() {
    let pool = WorkerPool::initialize(scripted_factory(), config(2))
        .await
        .unwrap();

    let tasks = vec![
        matchup_task(0, "steady", 2),
        matchup_task(1, "steady", 2),
        matchup_task(0, "steady", 3),
    ];
    let mut submission = pool.submit(tasks);
    assert_eq!(submission.task_count(), 3);
    assert_eq!(submission.total_units(), 4);
    submission.close_events();

    let outcomes = submission.wait().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
    let rejected: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(
        rejected[0].result.as_ref().unwrap_err().root_cause(),
        &WorkerError::DuplicateTask(TaskId(0))
    );
    // Only the accepted tasks reached a worker
    assert_eq!(pool.metrics().completed_tasks(), 2);
}

#[tokio::test]
async fn test_empty_submission_resolves_immediately() {
    let pool = WorkerPool::initialize(scripted_factory(), config(1))
        .await
        .unwrap();
    assert!(pool.submit(Vec::new()).wait().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_init_error_fails_the_whole_pool() {
    let result = WorkerPool::initialize(failing_factory(), config(3)).await;
    assert!(matches!(result, Err(WorkerError::Init(_))));
}

#[tokio::test]
async fn test_init_timeout_fails_the_whole_pool() {
    let config = config(2).with_init_timeout(Duration::from_millis(50));
    let result = WorkerPool::initialize(sluggish_factory(), config).await;
    assert!(matches!(result, Err(WorkerError::InitTimeout(_))));
}
