//! Per-activity health as seen by the coordinator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;

/// Why a single iteration of an activity did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("iteration failed: {0}")]
    Failed(String),

    #[error("iteration panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    /// Still looping, but the last iterations failed.
    Failing {
        consecutive_failures: u32,
        last_error: String,
    },
    /// Gave up after too many consecutive failures. The process stays up.
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
    Stopped,
}

/// Shared status table, keyed by activity name.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard {
    inner: Arc<Mutex<BTreeMap<String, ActivityStatus>>>,
}

impl HealthBoard {
    pub fn set(&self, activity: &str, status: ActivityStatus) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(activity.to_string(), status);
    }

    pub fn get(&self, activity: &str) -> Option<ActivityStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(activity)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, ActivityStatus)> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn any_degraded(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|(_, s)| matches!(s, ActivityStatus::Degraded { .. }))
    }
}
