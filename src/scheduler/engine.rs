use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::history::{ActivityError, ActivityStatus, HealthBoard};
use super::PeriodicActivity;

/// Read-only view of the coordinator's liveness flag, for loops that are not
/// run by the coordinator itself (the foreground desk).
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs periodic activities until shutdown.
pub struct Coordinator {
    running: Arc<AtomicBool>,
    max_consecutive_failures: u32,
    health: HealthBoard,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// `max_consecutive_failures` iterations failing in a row retire an
    /// activity as degraded. Values below 1 are treated as 1.
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            max_consecutive_failures: max_consecutive_failures.max(1),
            health: HealthBoard::default(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch every activity concurrently. Must be called inside a tokio
    /// runtime.
    pub fn start(&self, activities: Vec<Box<dyn PeriodicActivity>>) {
        info!(count = activities.len(), "Coordinator starting activities");
        for activity in activities {
            self.spawn(activity);
        }
    }

    pub fn spawn(&self, activity: Box<dyn PeriodicActivity>) {
        let running = self.running.clone();
        let health = self.health.clone();
        let max = self.max_consecutive_failures;
        let handle = tokio::spawn(run_activity(activity, running, health, max));
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Clear the liveness flag. Returns `true` only for the call that
    /// actually stopped the coordinator; later calls are no-ops.
    ///
    /// Does not wait: in-flight iterations finish and their loops exit on
    /// the next wake. Use [`Coordinator::join`] to wait for that.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!("Shutdown requested");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> RunningFlag {
        RunningFlag(self.running.clone())
    }

    pub fn health(&self) -> &HealthBoard {
        &self.health
    }

    /// Wait for every launched activity to exit.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Activity task ended abnormally");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Main loop of one activity.
async fn run_activity(
    mut activity: Box<dyn PeriodicActivity>,
    running: Arc<AtomicBool>,
    health: HealthBoard,
    max_consecutive_failures: u32,
) {
    let name = activity.name().to_string();
    info!(activity = %name, interval = ?activity.interval(), "Activity started");
    health.set(&name, ActivityStatus::Running);

    let mut interval = tokio::time::interval(activity.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures: u32 = 0;

    loop {
        interval.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let err = match AssertUnwindSafe(activity.run_once()).catch_unwind().await {
            Ok(Ok(())) => {
                if failures > 0 {
                    info!(activity = %name, after = failures, "Activity recovered");
                    failures = 0;
                    health.set(&name, ActivityStatus::Running);
                }
                continue;
            }
            Ok(Err(e)) => ActivityError::Failed(format!("{e:#}")),
            Err(panic) => ActivityError::Panicked(panic_message(panic.as_ref())),
        };

        failures += 1;
        if failures >= max_consecutive_failures {
            error!(activity = %name, failures, error = %err, "Activity degraded, giving up");
            health.set(
                &name,
                ActivityStatus::Degraded {
                    consecutive_failures: failures,
                    last_error: err.to_string(),
                },
            );
            return;
        }

        warn!(activity = %name, failures, error = %err, "Activity iteration failed, retrying next tick");
        health.set(
            &name,
            ActivityStatus::Failing {
                consecutive_failures: failures,
                last_error: err.to_string(),
            },
        );
    }

    info!(activity = %name, "Activity stopped");
    health.set(&name, ActivityStatus::Stopped);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
