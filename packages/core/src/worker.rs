//! Worker identity and lifecycle as seen by the coordinator.

use serde::{Deserialize, Serialize};

/// Identifier of a pool member, unique within one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a worker terminated.
///
/// `code` is set for stops and failures (0 and 1), `signal` for kills and
/// stops carrying a reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WorkerExit {
    /// Clean stop without a reason.
    pub fn normal() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    /// Stopped or killed with a reason.
    pub fn signalled(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(reason.into()),
            detail: None,
        }
    }

    pub fn killed() -> Self {
        Self::signalled("killed")
    }

    /// Panicked or returned an error.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            code: Some(1),
            signal: None,
            detail: Some(detail.into()),
        }
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Exited(WorkerExit),
}

/// Coordinator-side record of one spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub state: WorkerState,
}

impl WorkerHandle {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkerState::Running)
    }

    /// Record the exit. Returns false if the worker had already exited.
    pub fn mark_exited(&mut self, exit: WorkerExit) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = WorkerState::Exited(exit);
        true
    }
}
