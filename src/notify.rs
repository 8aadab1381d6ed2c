//! Boundary to the outside world: the notification path and the display.
//!
//! The core calls into these traits and never depends on how they are
//! implemented. A windowed shell, an audio player or a browser launcher
//! would sit behind them; this crate ships a logging notifier and a
//! console presenter.

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::ledger::CheckoutRecord;
use crate::reminder::DisplayState;

/// Receives fired reminders.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Alert whoever is watching. May block until acknowledged; the caller
    /// runs it off the tick loop.
    async fn fire(&self, label: &str, action_url: Option<&Url>) -> anyhow::Result<()>;
}

/// Renders kiosk state and collects checkout decisions.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn render_status(&self, state: &DisplayState);

    /// Ask for checkout details. `record` is `None` for an unknown id.
    async fn render_checkout_prompt(&self, id: &str, record: Option<&CheckoutRecord>) -> CheckoutDecision;

    async fn render_checkin_prompt(&self, record: &CheckoutRecord) -> CheckinDecision;

    async fn show_notice(&self, notice: &Notice);
}

/// Fields a person fills in to take an exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutForm {
    pub name: String,
    pub email: String,
    pub exam: String,
    pub class_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutDecision {
    Submit(CheckoutForm),
    /// Register the id without taking an exam.
    Register { name: String, email: String },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinDecision {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A message for the operator, typically the outcome of a desk action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

/// Notifier that only records fired reminders in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn fire(&self, label: &str, action_url: Option<&Url>) -> anyhow::Result<()> {
        match action_url {
            Some(url) => info!(trigger = %label, url = %url, "Reminder"),
            None => info!(trigger = %label, "Reminder"),
        }
        Ok(())
    }
}
