//! Coordinator and worker tests on a live pool.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{CoordinatorError, ScanError, ScanReport};
use pool_core::{
    PoolEvent, RedeliveryPolicy, RespawnPolicy, ScanFailurePolicy, WorkerEvent, WorkerId,
    WorkerState,
};
use serde_json::Map;

use common::{dataset, eventually, next_matching, pool_config, scanner, start};

fn lease(ms: u64) -> RedeliveryPolicy {
    RedeliveryPolicy::new(Duration::from_millis(ms))
}

fn idle_scanner() -> Arc<dyn actors::Scanner> {
    scanner(|ctx| {
        Box::pin(async move { Ok::<_, ScanError>(ScanReport::new(ctx.slice.len(), 0)) })
    })
}

fn is_exit(event: &PoolEvent) -> bool {
    matches!(event, PoolEvent::WorkerExited { .. })
}

#[tokio::test]
async fn test_pool_starts_requested_workers() {
    let pool = start(pool_config(3, lease(30_000)), idle_scanner(), dataset(10)).await;

    let workers = pool.workers().await.unwrap();
    let ids: Vec<WorkerId> = workers.iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![WorkerId(1), WorkerId(2), WorkerId(3)]);
    assert!(workers.iter().all(|w| w.is_running()));
    assert!(pool.is_alive());

    pool.shutdown();
    assert_eq!(pool.wait().await, Ok(()));
}

#[tokio::test]
async fn test_empty_pool_is_valid() {
    let pool = start(pool_config(0, lease(30_000)), idle_scanner(), dataset(10)).await;

    assert!(pool.workers().await.unwrap().is_empty());
    assert!(pool.is_alive());

    // Jobs simply wait in the queue.
    pool.queue().enqueue_shards(2, Map::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.queue().stats().await.unwrap().pending, 2);

    pool.shutdown();
    assert_eq!(pool.wait().await, Ok(()));
}

#[tokio::test]
async fn test_worker_events_are_forwarded_unchanged() {
    let scan = scanner(|ctx| {
        Box::pin(async move {
            let worker_id = ctx.events.worker_id();
            ctx.events
                .info(format!("worker {} got chunk {}", worker_id, ctx.job.chunk_index));
            Ok::<_, ScanError>(ScanReport::new(ctx.slice.len(), 0))
        })
    });
    let mut pool = start(pool_config(1, lease(30_000)), scan, dataset(10)).await;

    pool.queue().enqueue_shards(1, Map::new()).await.unwrap();

    let event = next_matching(&mut pool, |e| matches!(e, PoolEvent::Worker { .. })).await;
    assert_eq!(
        event,
        PoolEvent::Worker {
            worker_id: WorkerId(1),
            event: WorkerEvent::Info("worker 1 got chunk 0".to_string()),
        }
    );

    pool.shutdown();
}

#[tokio::test]
async fn test_all_shards_processed_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let data = dataset(400);

    let scan_data = data.clone();
    let scan_seen = seen.clone();
    let scan = scanner(move |ctx| {
        let data = scan_data.clone();
        let seen = scan_seen.clone();
        Box::pin(async move {
            let items = data.slice(&ctx.slice)?;
            seen.lock().unwrap().extend_from_slice(items);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, ScanError>(ScanReport::new(items.len(), 0))
        })
    });

    let pool = start(pool_config(2, lease(30_000)), scan, data).await;
    let jobs = pool.queue().enqueue_shards(4, Map::new()).await.unwrap();
    assert_eq!(jobs.len(), 4);

    let queue = pool.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.stats().await.unwrap().acked == 4 }
    })
    .await;

    let stats = pool.queue().stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.reserved, 0);
    assert_eq!(stats.redelivered, 0);

    let mut items = seen.lock().unwrap().clone();
    items.sort();
    assert_eq!(items, (0..400).collect::<Vec<u64>>());

    pool.shutdown();
    assert_eq!(pool.wait().await, Ok(()));
}

#[tokio::test]
async fn test_failed_scan_is_not_acked_and_gets_redelivered() {
    let scan = scanner(|ctx| {
        Box::pin(async move {
            if ctx.attempt == 1 {
                return Err(ScanError::new("flaky backend"));
            }
            Ok(ScanReport::new(ctx.slice.len(), 0))
        })
    });
    let mut pool = start(pool_config(1, lease(50)), scan, dataset(10)).await;

    let job = pool
        .queue()
        .enqueue_shards(1, Map::new())
        .await
        .unwrap()
        .remove(0);

    let event = next_matching(&mut pool, |e| {
        matches!(e, PoolEvent::Worker { event: WorkerEvent::Error(_), .. })
    })
    .await;
    assert!(event.description().contains("flaky backend"));

    let queue = pool.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.stats().await.unwrap().acked == 1 }
    })
    .await;

    let done = pool.queue().get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.attempts, 2);

    // The worker kept consuming after the failure.
    let workers = pool.workers().await.unwrap();
    assert!(workers[0].is_running());

    pool.shutdown();
}

#[tokio::test]
async fn test_terminated_worker_is_reported_and_pool_survives() {
    let mut pool = start(pool_config(2, lease(30_000)), idle_scanner(), dataset(10)).await;

    pool.terminate_worker(WorkerId(1)).await.unwrap();

    let event = next_matching(&mut pool, is_exit).await;
    assert_eq!(event.worker_id(), WorkerId(1));
    assert_eq!(event.to_string(), "worker 1 died");

    let workers = pool.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert!(matches!(workers[0].state, WorkerState::Exited(_)));
    assert!(workers[1].is_running());
    assert!(pool.is_alive());

    // A dead worker cannot be terminated twice.
    assert_eq!(
        pool.terminate_worker(WorkerId(1)).await,
        Err(CoordinatorError::WorkerNotRunning(WorkerId(1)))
    );

    // No further exit notifications were produced.
    let extra = tokio::time::timeout(Duration::from_millis(100), async {
        loop {
            match pool.next_event().await {
                Some(event) if is_exit(&event) => return event,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(extra.is_err());

    pool.shutdown();
    assert_eq!(pool.wait().await, Ok(()));
}

#[tokio::test]
async fn test_scan_failure_can_terminate_worker() {
    let scan = scanner(|_| {
        Box::pin(async { Err::<ScanReport, _>(ScanError::new("corrupt shard")) })
    });
    let config = pool_config(1, lease(30_000))
        .with_scan_failure_policy(ScanFailurePolicy::TerminateWorker);
    let mut pool = start(config, scan, dataset(10)).await;

    pool.queue().enqueue_shards(1, Map::new()).await.unwrap();

    // Supervision and worker messages are not ordered against each other.
    let mut error = None;
    let mut exit = None;
    while error.is_none() || exit.is_none() {
        match next_matching(&mut pool, |_| true).await {
            PoolEvent::Worker {
                event: WorkerEvent::Error(message),
                ..
            } => error = Some(message),
            PoolEvent::WorkerExited { worker_id, exit: e } => {
                assert_eq!(worker_id, WorkerId(1));
                exit = Some(e);
            }
            PoolEvent::Worker { .. } => {}
        }
    }
    assert!(error.is_some_and(|m| m.contains("corrupt shard")));
    assert_eq!(exit.and_then(|e| e.code), Some(1));

    // The job stays reserved until its lease runs out.
    let stats = pool.queue().stats().await.unwrap();
    assert_eq!(stats.reserved, 1);
    assert_eq!(stats.acked, 0);
    assert!(pool.is_alive());

    pool.shutdown();
}

#[tokio::test]
async fn test_dead_workers_are_replaced_when_respawning() {
    let config = pool_config(1, lease(30_000)).with_respawn(RespawnPolicy::Always);
    let mut pool = start(config, idle_scanner(), dataset(10)).await;

    pool.terminate_worker(WorkerId(1)).await.unwrap();
    next_matching(&mut pool, is_exit).await;

    let workers = pool.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert!(!workers[0].is_running());
    assert_eq!(workers[1].id, WorkerId(2));
    assert!(workers[1].is_running());

    pool.shutdown();
}

#[tokio::test]
async fn test_coordination_error_is_fatal() {
    let pool = start(pool_config(2, lease(30_000)), idle_scanner(), dataset(10)).await;

    pool.raise_coordination_error("channel corrupted").unwrap();

    let result = tokio::time::timeout(common::PATIENCE, pool.wait())
        .await
        .expect("coordinator did not stop");
    assert_eq!(
        result,
        Err(CoordinatorError::Fatal("channel corrupted".to_string()))
    );
}

#[tokio::test]
async fn test_queue_failure_is_fatal() {
    let pool = start(pool_config(1, lease(30_000)), idle_scanner(), dataset(10)).await;

    pool.queue().shutdown();

    let result = tokio::time::timeout(common::PATIENCE, pool.wait())
        .await
        .expect("coordinator did not stop");
    assert!(matches!(result, Err(CoordinatorError::Fatal(_))));
}

#[tokio::test]
async fn test_unrequested_coordinator_stop_is_fatal() {
    let pool = start(pool_config(2, lease(30_000)), idle_scanner(), dataset(10)).await;

    pool.coordinator().stop(Some("external stop".to_string()));

    let result = tokio::time::timeout(common::PATIENCE, pool.wait())
        .await
        .expect("coordinator did not stop");
    assert!(matches!(result, Err(CoordinatorError::Fatal(_))));
}
