//! Periodic activity coordination.
//!
//! The [`Coordinator`] owns the process-wide liveness flag and runs each
//! [`PeriodicActivity`] on its own tokio task. Activities check the flag once
//! per iteration and exit on the next wake after [`Coordinator::stop`].
//! Shutdown is cooperative: nothing is interrupted mid-iteration.

pub mod engine;
pub mod history;

use std::time::Duration;

use async_trait::async_trait;

pub use self::engine::{Coordinator, RunningFlag};
pub use self::history::{ActivityError, ActivityStatus, HealthBoard};

/// Work done at a fixed interval until shutdown.
///
/// Each activity owns its mutable state. Anything shared with other
/// activities must go through a component that serialises its own access
/// (the ledger, or the reminder engine's mutex).
#[async_trait]
pub trait PeriodicActivity: Send + 'static {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// One unit of work. An error counts towards the activity's consecutive
    /// failure budget; the loop itself keeps going.
    async fn run_once(&mut self) -> anyhow::Result<()>;
}
