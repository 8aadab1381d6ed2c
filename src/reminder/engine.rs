use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, info};

use super::{ActiveWindow, DisplayState, FiredTrigger, ReminderError, TickOutcome, TriggerDefinition};

/// Engine handle shared between the tick loop and read-only observers.
/// The mutex serialises `tick` if more than one timer source drives it.
pub type SharedEngine = Arc<tokio::sync::Mutex<ReminderEngine>>;

/// Longest span [`ReminderEngine::preview`] will cover: one leap year.
pub const MAX_PREVIEW_HOURS: u32 = 24 * 366;

/// Decides which triggers fire on each poll of the wall clock.
#[derive(Debug, Clone)]
pub struct ReminderEngine {
    /// Sorted by ascending offset; evaluation and firing follow this order.
    triggers: Vec<TriggerDefinition>,
    window: Option<ActiveWindow>,
    pending_window_minutes: u32,
}

impl ReminderEngine {
    /// Build an engine. `window = None` means always active.
    pub fn new(
        mut triggers: Vec<TriggerDefinition>,
        window: Option<ActiveWindow>,
        pending_window_minutes: u32,
    ) -> Result<Self, ReminderError> {
        let mut seen = HashSet::new();
        for t in &triggers {
            if !seen.insert(t.offset_minutes) {
                return Err(ReminderError::DuplicateOffset(t.offset_minutes));
            }
        }
        triggers.sort_by_key(|t| t.offset_minutes);
        for t in triggers.iter_mut() {
            t.fired = false;
        }

        Ok(Self {
            triggers,
            window,
            pending_window_minutes,
        })
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn triggers(&self) -> &[TriggerDefinition] {
        &self.triggers
    }

    pub fn window(&self) -> Option<ActiveWindow> {
        self.window
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.window.map_or(true, |w| w.contains(now.hour()))
    }

    /// Evaluate every trigger against `now`.
    ///
    /// A trigger whose offset matches the current minute fires if the hour is
    /// inside the active window and it has not fired yet this minute. Every
    /// trigger whose offset does not match has its dedup flag cleared, so it
    /// can fire again next hour. The flag is left untouched while inactive.
    pub fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let minute = now.minute();
        let active = self.is_active(now);
        let mut fired = Vec::new();

        for trigger in self.triggers.iter_mut() {
            if trigger.offset_minutes != minute {
                trigger.fired = false;
                continue;
            }
            if !active {
                debug!(trigger = %trigger.label, "trigger minute reached while inactive");
                continue;
            }
            if trigger.fired {
                continue;
            }

            trigger.fired = true;
            info!(trigger = %trigger.label, offset = trigger.offset_minutes, "Trigger fired");
            fired.push(FiredTrigger {
                offset_minutes: trigger.offset_minutes,
                label: trigger.label.clone(),
                action_url: trigger.action_url.clone(),
                at: now,
            });
        }

        TickOutcome {
            display: self.display_state(now),
            fired,
        }
    }

    /// Display state at `now`, without touching any dedup state.
    pub fn display_state(&self, now: NaiveDateTime) -> DisplayState {
        if !self.is_active(now) {
            return DisplayState::Inactive;
        }

        let minute = now.minute();
        if let Some(due) = self.triggers.iter().find(|t| t.offset_minutes == minute) {
            return DisplayState::Due {
                label: due.label.clone(),
            };
        }

        match self.next_trigger(now) {
            Some((next, minutes_until)) if minutes_until <= self.pending_window_minutes => {
                let due_at = minute_floor(now) + Duration::minutes(i64::from(minutes_until));
                if self.is_active(due_at) {
                    DisplayState::Pending {
                        label: next.label.clone(),
                        minutes_until,
                    }
                } else {
                    DisplayState::Idle
                }
            }
            _ => DisplayState::Idle,
        }
    }

    /// The next trigger strictly after the current minute, and how many
    /// minutes away it is (1..=60). Ignores the active window.
    pub fn next_trigger(&self, now: NaiveDateTime) -> Option<(&TriggerDefinition, u32)> {
        let minute = now.minute();
        self.triggers
            .iter()
            .map(|t| {
                let delta = (t.offset_minutes + 60 - minute) % 60;
                (t, if delta == 0 { 60 } else { delta })
            })
            .min_by_key(|(_, delta)| *delta)
    }

    /// Fire times after `from` and within the next `hours`, honouring the
    /// active window. `hours` is clamped to [`MAX_PREVIEW_HOURS`]; a span
    /// running past the end of the calendar is cut short there.
    pub fn preview(&self, from: NaiveDateTime, hours: u32) -> Vec<(NaiveDateTime, &TriggerDefinition)> {
        let hours = hours.min(MAX_PREVIEW_HOURS);
        let hour_start = minute_floor(from) - Duration::minutes(i64::from(from.minute()));
        let end = from
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .unwrap_or(NaiveDateTime::MAX);
        let mut upcoming = Vec::new();

        for h in 0..=hours {
            let Some(base) = hour_start.checked_add_signed(Duration::hours(i64::from(h))) else {
                break;
            };
            for t in &self.triggers {
                let Some(at) = base.checked_add_signed(Duration::minutes(i64::from(t.offset_minutes))) else {
                    continue;
                };
                if at > from && at <= end && self.is_active(at) {
                    upcoming.push((at, t));
                }
            }
        }
        upcoming
    }
}

fn minute_floor(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
