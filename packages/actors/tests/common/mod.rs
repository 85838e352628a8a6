#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{FnScanner, PoolHandle, ScanContext, ScanFuture, Scanner, start_pool_with_store};
use db::{DbConfig, DbError, repositories::JobRepository};
use pool_core::{BrokerConfig, InMemoryDataset, PoolConfig, PoolEvent, RedeliveryPolicy};

/// How long a test waits for something that should happen quickly.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Fresh in-memory store. Every call gets its own datastore.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}

pub fn broker(redelivery: RedeliveryPolicy) -> BrokerConfig {
    BrokerConfig::memory("scans", redelivery).with_sweep_interval(Duration::from_millis(10))
}

pub fn pool_config(num_workers: usize, redelivery: RedeliveryPolicy) -> PoolConfig {
    PoolConfig::new(num_workers, broker(redelivery)).with_poll_interval(Duration::from_millis(10))
}

pub fn dataset(len: u64) -> Arc<InMemoryDataset<u64>> {
    Arc::new(InMemoryDataset::new("numbers", (0..len).collect()))
}

pub fn scanner<F>(scan: F) -> Arc<dyn Scanner>
where
    F: Fn(ScanContext) -> ScanFuture + Send + Sync + 'static,
{
    Arc::new(FnScanner::new(scan))
}

pub async fn start(
    config: PoolConfig,
    scanner: Arc<dyn Scanner>,
    dataset: Arc<InMemoryDataset<u64>>,
) -> PoolHandle {
    let repo = setup_repo().await.unwrap();
    start_pool_with_store(config, repo, scanner, dataset)
        .await
        .unwrap()
}

/// Next pool event matching `pred`, skipping the others.
pub async fn next_matching<P>(pool: &mut PoolHandle, pred: P) -> PoolEvent
where
    P: Fn(&PoolEvent) -> bool,
{
    tokio::time::timeout(PATIENCE, async {
        loop {
            match pool.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("pool event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for pool event")
}

/// Poll `check` until it returns true.
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(PATIENCE, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
