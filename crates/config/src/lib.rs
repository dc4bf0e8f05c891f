use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ── Session takeover policy ───────────────────────────────────────────────────

/// What happens when an owner starts a review while one is already active.
///
/// | Policy    | Behaviour                                                  |
/// |-----------|------------------------------------------------------------|
/// | `replace` | Last start wins; the old session is discarded silently.    |
/// | `reject`  | The new start is refused until the old session completes.  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTakeover {
    #[default]
    Replace,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    /// Directory holding the word store database.
    pub data_dir: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Tango".to_string(),
            data_dir: "./tango-data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Review interval offsets in calendar days since registration.
    /// A word is due only on a day whose elapsed count matches one of
    /// these exactly.
    pub intervals: Vec<u32>,
    /// IANA timezone name (e.g. `"Asia/Tokyo"`, `"Europe/London"`).
    /// All day boundaries cross at local midnight in this zone.
    /// Falls back to UTC when the name is unrecognised.
    pub timezone: String,
    /// Local hour at which the daily due-batch reminders go out.
    pub reminder_hour: u8,
    /// Local hour of the separate inactivity-nudge pass.
    pub nudge_hour: u8,
    /// Delay before a snoozed reminder is re-delivered.
    pub snooze_minutes: u64,
    /// Maximum cards pulled into a reminder-started session.
    pub reminder_batch_size: usize,
    /// Delay before the single retry after a whole sweep pass fails.
    pub sweep_retry_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            intervals: vec![1, 4, 10, 17, 30, 60],
            timezone: "Asia/Tokyo".to_string(),
            reminder_hour: 21,
            nudge_hour: 22,
            snooze_minutes: 60,
            reminder_batch_size: 5,
            sweep_retry_minutes: 5,
        }
    }
}

impl ScheduleConfig {
    /// Resolve the configured timezone, falling back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Seconds of inactivity after which an open session auto-completes
    /// with a partial summary.
    pub session_timeout_secs: u64,
    /// Policy for a second `start` while a session is active.
    pub on_existing_session: SessionTakeover,
    /// Number of cards in an ad-hoc quiz.
    pub quiz_size: usize,
    /// Difficulty weighting strength for quiz sampling, clamped to
    /// `[0, 3]` at use. `0` means uniform.
    pub sampling_bias: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 300,
            on_existing_session: SessionTakeover::Replace,
            quiz_size: 10,
            sampling_bias: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub schedule: ScheduleConfig,
    pub review: ReviewConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // Timezone env override (takes precedence over the config file).
        if let Ok(zone) = env::var("TANGO_TIMEZONE") {
            if !zone.is_empty() {
                config.schedule.timezone = zone;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
