//! Events relayed from workers through the coordinator.

use serde::{Deserialize, Serialize};

use crate::worker::{WorkerExit, WorkerId};

/// Event emitted by a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Informational message emitted while scanning.
    Info(String),
    /// A job attempt failed.
    Error(String),
}

/// Events on the coordinator's outward channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// An event forwarded verbatim from a worker.
    Worker {
        worker_id: WorkerId,
        event: WorkerEvent,
    },
    /// A worker terminated.
    WorkerExited {
        worker_id: WorkerId,
        exit: WorkerExit,
    },
}

impl PoolEvent {
    /// Worker the event originated from.
    pub fn worker_id(&self) -> WorkerId {
        match self {
            PoolEvent::Worker { worker_id, .. } => *worker_id,
            PoolEvent::WorkerExited { worker_id, .. } => *worker_id,
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        match self {
            PoolEvent::Worker {
                worker_id,
                event: WorkerEvent::Info(message),
            } => format!("worker {} info: {}", worker_id, message),
            PoolEvent::Worker {
                worker_id,
                event: WorkerEvent::Error(error),
            } => format!("worker {} error: {}", worker_id, error),
            PoolEvent::WorkerExited { worker_id, .. } => format!("worker {} died", worker_id),
        }
    }
}

impl std::fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_notification_names_the_worker() {
        let event = PoolEvent::WorkerExited {
            worker_id: WorkerId(7),
            exit: WorkerExit::killed(),
        };
        assert_eq!(event.to_string(), "worker 7 died");
        assert_eq!(event.worker_id(), WorkerId(7));
    }

    #[test]
    fn pool_events_serialize_as_json_lines() {
        let forwarded = PoolEvent::Worker {
            worker_id: WorkerId(2),
            event: WorkerEvent::Info("chunk 1/4 done".to_string()),
        };
        let value = serde_json::to_value(&forwarded).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "worker",
                "worker_id": 2,
                "event": {"kind": "info", "payload": "chunk 1/4 done"}
            })
        );
        let parsed: PoolEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, forwarded);

        let exited = PoolEvent::WorkerExited {
            worker_id: WorkerId(3),
            exit: WorkerExit::failed("scan panicked"),
        };
        let line = serde_json::to_string(&exited).unwrap();
        assert!(line.starts_with(r#"{"type":"worker_exited","worker_id":3"#));
        let parsed: PoolEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, exited);
    }
}
