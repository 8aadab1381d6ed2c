//! TOML configuration for the kiosk.
//!
//! Sections fall back to defaults individually, so a file only needs the
//! settings it changes. The core never reads this file: [`KioskConfig`] is
//! turned into plain trigger and window values before anything starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::reminder::{ActiveWindow, ReminderEngine, TriggerDefinition};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "MENTOR_KIOSK_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mentor-kiosk.toml";

/// Upper bound on the poll interval; a slower poll could miss a whole
/// trigger minute.
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KioskConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded kiosk configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit`, if given (errors are returned, not skipped).
    /// 2. The file named by `MENTOR_KIOSK_CONFIG`.
    /// 3. `mentor-kiosk.toml` in the working directory.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "MENTOR_KIOSK_CONFIG set but file could not be loaded, trying fallback"
                ),
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Check everything that would otherwise fail at startup.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.tick_interval_ms == 0 || self.schedule.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            bail!(
                "schedule.tick_interval_ms must be between 1 and {MAX_TICK_INTERVAL_MS}, got {}",
                self.schedule.tick_interval_ms
            );
        }
        self.reminder_engine()?;
        Ok(())
    }

    /// Build the reminder engine from `[schedule]`.
    pub fn reminder_engine(&self) -> Result<ReminderEngine> {
        let mut triggers = Vec::with_capacity(self.schedule.triggers.len());
        for t in &self.schedule.triggers {
            let mut def = TriggerDefinition::new(t.offset_minutes, t.label.clone())?;
            if let Some(raw) = &t.action_url {
                let url = Url::parse(raw).map_err(|e| crate::reminder::ReminderError::InvalidUrl {
                    url: raw.clone(),
                    reason: e.to_string(),
                })?;
                def = def.with_action_url(url);
            }
            triggers.push(def);
        }

        let window = self
            .schedule
            .active_window
            .map(|w| ActiveWindow::new(w.start_hour, w.end_hour))
            .transpose()?;

        Ok(ReminderEngine::new(
            triggers,
            window,
            self.schedule.pending_window_minutes,
        )?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.schedule.tick_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Text shown in the middle of the status display.
    pub banner_text: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            banner_text: "Welcome! Scan your card to check an exam in or out.".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// How often the reminder loop polls the clock.
    pub tick_interval_ms: u64,
    /// Show the upcoming trigger this many minutes ahead.
    pub pending_window_minutes: u32,
    /// Failures in a row before an activity is retired as degraded.
    pub max_consecutive_failures: u32,
    /// Hours during which reminders fire. Absent means always.
    pub active_window: Option<WindowConfig>,
    pub triggers: Vec<TriggerConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            pending_window_minutes: 5,
            max_consecutive_failures: 5,
            active_window: Some(WindowConfig {
                start_hour: 10,
                end_hour: 18,
            }),
            triggers: vec![
                TriggerConfig {
                    offset_minutes: 30,
                    label: "Half hour check".to_string(),
                    action_url: None,
                },
                TriggerConfig {
                    offset_minutes: 55,
                    label: "One hour check".to_string(),
                    action_url: None,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub offset_minutes: u32,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Checkout ledger file.
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ledger.csv"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = KioskConfig::default();
        assert_eq!(cfg.schedule.tick_interval_ms, 1_000);
        assert_eq!(cfg.schedule.pending_window_minutes, 5);
        assert_eq!(cfg.schedule.triggers.len(), 2);
        assert_eq!(cfg.ledger.path, PathBuf::from("data/ledger.csv"));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        cfg.validate().unwrap();

        let engine = cfg.reminder_engine().unwrap();
        let offsets: Vec<u32> = engine.triggers().iter().map(|t| t.offset_minutes()).collect();
        assert_eq!(offsets, vec![30, 55]);
        let window = engine.window().unwrap();
        assert_eq!((window.start_hour(), window.end_hour()), (10, 18));
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[display]
banner_text = "Mentor desk"

[schedule]
tick_interval_ms = 500
pending_window_minutes = 3
active_window = { start_hour = 0, end_hour = 18 }

[[schedule.triggers]]
offset_minutes = 55
label = "Hourly headcount!"
action_url = "https://forms.example.com/hourly"

[[schedule.triggers]]
offset_minutes = 30
label = "TRASH 30"

[ledger]
path = "/var/lib/mentor-kiosk/ledger.csv"

[logging]
level = "debug"
format = "json"
"#;

        let cfg: KioskConfig = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.display.banner_text, "Mentor desk");
        assert_eq!(cfg.tick_interval(), Duration::from_millis(500));
        assert_eq!(cfg.ledger.path, PathBuf::from("/var/lib/mentor-kiosk/ledger.csv"));
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let engine = cfg.reminder_engine().unwrap();
        let hourly = &engine.triggers()[1];
        assert_eq!(hourly.label(), "Hourly headcount!");
        assert_eq!(
            hourly.action_url().map(Url::as_str),
            Some("https://forms.example.com/hourly")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: KioskConfig = toml::from_str("[ledger]\npath = \"x.csv\"\n").unwrap();
        assert_eq!(cfg.ledger.path, PathBuf::from("x.csv"));
        assert_eq!(cfg.schedule.triggers.len(), 2);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_no_window_means_always_active() {
        let mut cfg = KioskConfig::default();
        cfg.schedule.active_window = None;
        assert!(cfg.reminder_engine().unwrap().window().is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cfg = KioskConfig::default();
        cfg.schedule.tick_interval_ms = 120_000;
        assert!(cfg.validate().is_err());

        let mut cfg = KioskConfig::default();
        cfg.schedule.triggers[0].offset_minutes = 60;
        assert!(cfg.validate().is_err());

        let mut cfg = KioskConfig::default();
        cfg.schedule.triggers[1].offset_minutes = 30;
        assert!(cfg.validate().is_err());

        let mut cfg = KioskConfig::default();
        cfg.schedule.triggers[0].action_url = Some("not a url".into());
        assert!(cfg.validate().is_err());

        let mut cfg = KioskConfig::default();
        cfg.schedule.active_window = Some(WindowConfig {
            start_hour: 8,
            end_hour: 8,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mentor-kiosk.toml");
        std::fs::write(&path, "[schedule]\ntick_interval_ms = 250\n").unwrap();
        let cfg = KioskConfig::load(&path).unwrap();
        assert_eq!(cfg.schedule.tick_interval_ms, 250);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        assert!(KioskConfig::resolve(Some(Path::new("/nonexistent/mentor-kiosk.toml"))).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = KioskConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: KioskConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.schedule.triggers.len(), cfg.schedule.triggers.len());
        assert_eq!(back.ledger.path, cfg.ledger.path);
        back.validate().unwrap();
    }
}
