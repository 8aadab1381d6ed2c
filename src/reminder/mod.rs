//! Minute-of-hour reminder triggers with once-per-hour dedup.
//!
//! A [`TriggerDefinition`] fires when the wall-clock minute equals its
//! offset, at most once per hour. The [`ReminderEngine`] is polled by the
//! coordinator (see [`ReminderActivity`]) and decides what fires on each
//! tick. Polling is non-persistent: if no tick lands inside a trigger's
//! minute (process stall, host asleep) that hour's firing is skipped and
//! never replayed.

pub mod activity;
pub mod engine;

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub use self::activity::ReminderActivity;
pub use self::engine::{ReminderEngine, SharedEngine, MAX_PREVIEW_HOURS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReminderError {
    #[error("trigger offset {0} is outside 0..=59")]
    InvalidOffset(u32),

    #[error("hour {0} is outside 0..=23")]
    InvalidHour(u32),

    #[error("active window {start}..{end} is empty")]
    EmptyWindow { start: u32, end: u32 },

    #[error("two triggers share offset minute {0}")]
    DuplicateOffset(u32),

    #[error("invalid action url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

// ---------------------------------------------------------------------------
// TriggerDefinition
// ---------------------------------------------------------------------------

/// A reminder that fires once per hour at a fixed minute.
///
/// `fired` is only ever mutated by the owning [`ReminderEngine`]; it is true
/// from the tick that fires the trigger until the first tick whose minute no
/// longer matches the offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDefinition {
    offset_minutes: u32,
    label: String,
    action_url: Option<Url>,
    fired: bool,
}

impl TriggerDefinition {
    pub fn new(offset_minutes: u32, label: impl Into<String>) -> Result<Self, ReminderError> {
        if offset_minutes > 59 {
            return Err(ReminderError::InvalidOffset(offset_minutes));
        }
        Ok(Self {
            offset_minutes,
            label: label.into(),
            action_url: None,
            fired: false,
        })
    }

    /// Builder-style setter for the resource opened when the trigger fires.
    pub fn with_action_url(mut self, url: Url) -> Self {
        self.action_url = Some(url);
        self
    }

    pub fn offset_minutes(&self) -> u32 {
        self.offset_minutes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn action_url(&self) -> Option<&Url> {
        self.action_url.as_ref()
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}

// ---------------------------------------------------------------------------
// ActiveWindow
// ---------------------------------------------------------------------------

/// Hours of the day during which triggers may fire.
///
/// `start_hour <= hour < end_hour`. A window whose start is after its end
/// wraps past midnight (`22..6` covers 22:00 through 05:59).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveWindow {
    start_hour: u32,
    end_hour: u32,
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, ReminderError> {
        for hour in [start_hour, end_hour] {
            if hour > 23 {
                return Err(ReminderError::InvalidHour(hour));
            }
        }
        if start_hour == end_hour {
            return Err(ReminderError::EmptyWindow {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

// ---------------------------------------------------------------------------
// Tick results
// ---------------------------------------------------------------------------

/// What the status display should show right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayState {
    /// Outside the active window; nothing fires.
    Inactive,
    /// Nothing due soon.
    Idle,
    /// The next trigger is a few minutes away.
    Pending { label: String, minutes_until: u32 },
    /// A trigger's minute is in progress.
    Due { label: String },
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayState::Inactive => write!(f, "After hours - reminders are inactive"),
            DisplayState::Idle => write!(f, "All caught up!"),
            DisplayState::Pending {
                label,
                minutes_until: 1,
            } => write!(f, "{label} coming up in 1 minute"),
            DisplayState::Pending {
                label,
                minutes_until,
            } => write!(f, "{label} coming up in {minutes_until} minutes"),
            DisplayState::Due { label } => write!(f, "Time to check in: {label}!"),
        }
    }
}

/// A trigger that fired during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
    pub offset_minutes: u32,
    pub label: String,
    pub action_url: Option<Url>,
    pub at: NaiveDateTime,
}

/// Result of a single [`ReminderEngine::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub display: DisplayState,
    /// Fired triggers in ascending offset order.
    pub fired: Vec<FiredTrigger>,
}
