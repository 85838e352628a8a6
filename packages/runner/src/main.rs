//! Pool runner: starts a coordinator from environment configuration and
//! prints every pool event as a JSON line on stdout.
//!
//! Besides the pool settings read by `PoolConfig::from_env`, the runner
//! understands:
//!
//! - `DATASET_SIZE` - items in the demo dataset (default 1000)
//! - `ENQUEUE_SPLIT_FACTOR` - if set, enqueue one job per shard at startup

use std::error::Error;
use std::sync::Arc;

use actors::{FnScanner, PoolHandle, ScanContext, ScanError, ScanFuture, ScanReport, start_pool};
use pool_core::{InMemoryDataset, PoolConfig, PoolEvent};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

const DEFAULT_DATASET_SIZE: usize = 1000;

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, Box<dyn Error>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid value for {}: {}", key, raw).into()),
        Err(_) => Ok(None),
    }
}

/// Counts items divisible by the `divisor` scan parameter.
fn demo_scan(dataset: Arc<InMemoryDataset<u64>>, ctx: ScanContext) -> ScanFuture {
    Box::pin(async move {
        let items = dataset.slice(&ctx.slice)?;
        let divisor = ctx
            .params
            .get("divisor")
            .and_then(Value::as_u64)
            .unwrap_or(7);
        if divisor == 0 {
            return Err(ScanError::new("divisor must be positive"));
        }

        let findings = items.iter().filter(|item| *item % divisor == 0).count();
        ctx.events.info(format!(
            "chunk {}/{}: {} of {} items divisible by {}",
            ctx.job.chunk_index,
            ctx.job.split_factor,
            findings,
            items.len(),
            divisor
        ));
        Ok(ScanReport::new(items.len(), findings))
    })
}

fn print_event(event: &PoolEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to encode event: {}", e),
    }
}

async fn run(config: PoolConfig) -> Result<(), Box<dyn Error>> {
    let size = env_number("DATASET_SIZE")?.unwrap_or(DEFAULT_DATASET_SIZE);
    let dataset = Arc::new(InMemoryDataset::new("demo", (0..size as u64).collect()));

    let scan_data = dataset.clone();
    let scanner = FnScanner::new(move |ctx| demo_scan(scan_data.clone(), ctx));

    let mut pool: PoolHandle = start_pool(config, Arc::new(scanner), dataset).await?;

    if let Some(split_factor) = env_number::<u32>("ENQUEUE_SPLIT_FACTOR")? {
        let jobs = pool.queue().enqueue_shards(split_factor, Map::new()).await?;
        tracing::info!("Enqueued {} shard jobs", jobs.len());
    }

    loop {
        tokio::select! {
            event = pool.next_event() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down pool");
                pool.shutdown();
                break;
            }
        }
    }

    pool.wait().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PoolConfig::from_env()?;
    tracing::info!(
        "Starting pool: {} workers on queue {}",
        config.num_workers,
        config.broker.queue_name
    );

    run(config).await.inspect_err(|e| {
        tracing::error!("Pool terminated: {}", e);
    })
}
