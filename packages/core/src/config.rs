//! Configuration for the pool, its workers and the queue broker.
//!
//! Values are built explicitly and handed to the coordinator, which passes
//! them down to every worker. Nothing here is process-global.

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Redelivery rules for jobs that are not acknowledged in time.
///
/// No `Default`: the acknowledgement deadline is always set explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// How long a consumer holds a reservation before the job is redelivered.
    pub ack_deadline: Duration,
    /// Delay between an expired reservation and the next delivery.
    pub backoff: Duration,
    /// Deliveries after which the job is dead-lettered. `None` retries forever.
    pub max_deliveries: Option<u32>,
}

impl RedeliveryPolicy {
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            ack_deadline,
            backoff: Duration::ZERO,
            max_deliveries: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    /// Whether a job with `attempts` deliveries may be delivered again.
    pub fn allows_delivery(&self, attempts: u32) -> bool {
        self.max_deliveries.is_none_or(|max| attempts < max)
    }
}

/// Where the durable queue lives and how it behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Store endpoint: `mem://`, `rocksdb://path`, or a remote URL.
    pub endpoint: String,
    /// Logical queue name.
    pub queue_name: String,
    /// Namespace index; queues with different indices never collide.
    pub index: u32,
    /// Optional root credentials for the store.
    pub credentials: Option<(String, String)>,
    pub redelivery: RedeliveryPolicy,
    /// How often expired reservations are swept back into the queue.
    pub sweep_interval: Duration,
}

impl BrokerConfig {
    /// In-memory broker, mostly useful for tests.
    pub fn memory(queue_name: impl Into<String>, redelivery: RedeliveryPolicy) -> Self {
        Self {
            endpoint: "mem://".to_string(),
            queue_name: queue_name.into(),
            index: 0,
            credentials: None,
            redelivery,
            sweep_interval: Duration::from_millis(100),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Store database selected by the namespace index.
    pub fn database(&self) -> String {
        format!("jobs_{}", self.index)
    }
}

/// What a worker does after a scan fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanFailurePolicy {
    /// Report the error and keep consuming jobs.
    #[default]
    ContinueConsuming,
    /// Report the error and terminate the worker.
    TerminateWorker,
}

/// What the coordinator does when a worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RespawnPolicy {
    /// Let the pool shrink.
    #[default]
    Never,
    /// Replace every dead worker.
    Always,
}

/// Top-level pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of workers spawned at startup.
    pub num_workers: usize,
    pub broker: BrokerConfig,
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    pub on_scan_failure: ScanFailurePolicy,
    pub respawn: RespawnPolicy,
    /// Parameters for the scanner, passed through untouched.
    pub scan_params: Map<String, Value>,
}

impl PoolConfig {
    pub fn new(num_workers: usize, broker: BrokerConfig) -> Self {
        Self {
            num_workers,
            broker,
            poll_interval: Duration::from_millis(100),
            on_scan_failure: ScanFailurePolicy::default(),
            respawn: RespawnPolicy::default(),
            scan_params: Map::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_scan_failure_policy(mut self, policy: ScanFailurePolicy) -> Self {
        self.on_scan_failure = policy;
        self
    }

    pub fn with_respawn(mut self, respawn: RespawnPolicy) -> Self {
        self.respawn = respawn;
        self
    }

    pub fn with_scan_params(mut self, params: Map<String, Value>) -> Self {
        self.scan_params = params;
        self
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let num_workers = parse_required(&lookup, "NUM_WORKERS")?;

        let ack_deadline_secs: u64 = parse_required(&lookup, "QUEUE_ACK_DEADLINE_SECS")?;
        let backoff_ms: u64 = parse_optional(&lookup, "QUEUE_REDELIVERY_BACKOFF_MS")?.unwrap_or(0);
        let mut redelivery = RedeliveryPolicy::new(Duration::from_secs(ack_deadline_secs))
            .with_backoff(Duration::from_millis(backoff_ms));
        if let Some(max) = parse_optional(&lookup, "QUEUE_MAX_DELIVERIES")? {
            redelivery = redelivery.with_max_deliveries(max);
        }

        let queue_name = lookup("QUEUE_NAME").unwrap_or_else(|| "tasks".to_string());
        let mut broker = BrokerConfig::memory(queue_name, redelivery)
            .with_index(parse_optional(&lookup, "QUEUE_DB_INDEX")?.unwrap_or(0));
        if let Some(endpoint) = lookup("BROKER_ENDPOINT") {
            broker = broker.with_endpoint(endpoint);
        }
        if let (Some(user), Some(pass)) = (lookup("BROKER_USER"), lookup("BROKER_PASS")) {
            broker = broker.with_credentials(user, pass);
        }

        let mut config = Self::new(num_workers, broker);
        if let Some(ms) = parse_optional::<u64, _>(&lookup, "WORKER_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(value) = lookup("SCAN_FAILURE_POLICY") {
            config.on_scan_failure = match value.as_str() {
                "continue" => ScanFailurePolicy::ContinueConsuming,
                "terminate" => ScanFailurePolicy::TerminateWorker,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SCAN_FAILURE_POLICY",
                        value,
                    });
                }
            };
        }

        if let Some(respawn) = parse_optional::<bool, _>(&lookup, "RESPAWN_WORKERS")? {
            config.respawn = if respawn {
                RespawnPolicy::Always
            } else {
                RespawnPolicy::Never
            };
        }

        if let Some(raw) = lookup("SCAN_PARAMS") {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(params)) => config.scan_params = params,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SCAN_PARAMS",
                        value: raw,
                    });
                }
            }
        }

        Ok(config)
    }
}

fn parse_optional<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_required<T, F>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    parse_optional(lookup, key)?.ok_or(ConfigError::Missing(key))
}
