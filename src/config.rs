//! Configuration types for the punch automation.
//!
//! Everything lives in one TOML file (`config_dir()/config.toml`). All
//! sections are optional and fall back to their defaults.

use crate::credentials::CredentialRef;
use crate::engine::supervisor::RetryPolicy;
use crate::engine::{EngineSettings, HeartbeatPolicy};
use crate::error::{PontoError, Result};
use crate::schedule::{
    DayOfWeek, DayPlan, FileScheduleStore, Schedule, ScheduleMode, ScheduleStore, StaticSchedule,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PontoConfig {
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub portal: PortalConfig,
    pub notifier: NotifierConfig,
    pub credentials: CredentialsConfig,
    pub logging: LoggingConfig,
}

/// Timing and retry knobs of the automation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries after the first failed attempt of a step.
    pub max_retries: u32,
    /// Base of the linear backoff between retries.
    pub retry_interval_ms: u64,
    /// Lateness accepted when a heartbeat fires after the target.
    pub tolerance_secs: u64,
    /// Reads performed after a submit before giving up.
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    /// How far a new punch may drift from the target and still count.
    pub match_tolerance_mins: u32,
    /// Days after today scanned for the next punch.
    pub lookahead_days: u32,
    /// How long `stop` waits for the run task before aborting it.
    pub stop_grace_secs: u64,
    pub heartbeat_far_secs: u64,
    pub heartbeat_near_secs: u64,
    pub heartbeat_floor_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval_ms: 2_000,
            tolerance_secs: 10,
            verify_attempts: 10,
            verify_interval_ms: 5_000,
            match_tolerance_mins: 2,
            lookahead_days: 6,
            stop_grace_secs: 30,
            heartbeat_far_secs: 300,
            heartbeat_near_secs: 60,
            heartbeat_floor_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Runtime settings for [`crate::engine::AutomationEngine`].
    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_interval_ms)),
            heartbeat: HeartbeatPolicy {
                far: Duration::from_secs(self.heartbeat_far_secs),
                near: Duration::from_secs(self.heartbeat_near_secs),
                floor: Duration::from_secs(self.heartbeat_floor_secs),
            },
            tolerance: Duration::from_secs(self.tolerance_secs),
            verify_attempts: self.verify_attempts,
            verify_interval: Duration::from_millis(self.verify_interval_ms),
            match_tolerance_mins: i32::try_from(self.match_tolerance_mins).unwrap_or(i32::MAX),
            lookahead_days: self.lookahead_days,
            stop_grace: Duration::from_secs(self.stop_grace_secs),
        }
    }
}

/// The desired schedule, inline or in a separate file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// External schedule file, re-read at every cycle. Overrides the inline
    /// tables when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub mode: ScheduleMode,
    pub weekly: BTreeMap<DayOfWeek, DayPlan>,
    pub monthly: BTreeMap<NaiveDate, DayPlan>,
}

impl ScheduleConfig {
    /// The inline schedule.
    #[must_use]
    pub fn inline(&self) -> Schedule {
        Schedule {
            mode: self.mode,
            weekly: self.weekly.clone(),
            monthly: self.monthly.clone(),
        }
    }

    /// Store the engine reads the schedule from.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ScheduleStore> {
        match &self.file {
            Some(path) => Arc::new(FileScheduleStore::new(path)),
            None => Arc::new(StaticSchedule(self.inline())),
        }
    }
}

impl From<Schedule> for ScheduleConfig {
    fn from(schedule: Schedule) -> Self {
        Self {
            file: None,
            mode: schedule.mode,
            weekly: schedule.weekly,
            monthly: schedule.monthly,
        }
    }
}

/// How to reach the portal automation driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Executable that speaks the driver protocol on stdio.
    pub driver_command: String,
    pub driver_args: Vec<String>,
    /// Deadline for a single driver request.
    pub request_timeout_secs: u64,
    /// Where the driver should write snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            driver_command: "ponto-driver".to_owned(),
            driver_args: Vec::new(),
            request_timeout_secs: 60,
            snapshot_dir: None,
        }
    }
}

/// Which notifier to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Messages only go to the log.
    #[default]
    Log,
    /// Telegram Bot API.
    Telegram,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    #[serde(skip_serializing_if = "CredentialRef::is_none")]
    pub bot_token: CredentialRef,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            bot_token: CredentialRef::None,
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_owned(),
            timeout_secs: 15,
        }
    }
}

/// References to the portal login secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    #[serde(skip_serializing_if = "CredentialRef::is_none")]
    pub folha: CredentialRef,
    #[serde(skip_serializing_if = "CredentialRef::is_none")]
    pub senha: CredentialRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write a daily rolling log file under the logs directory.
    pub file: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PontoConfig {
    /// A starter config with a Monday–Friday 08:00/12:00/13:00/17:00 schedule.
    #[must_use]
    pub fn template() -> Self {
        Self {
            schedule: Schedule::workweek(DayPlan::with_times(&["08:00", "12:00", "13:00", "17:00"]))
                .into(),
            credentials: CredentialsConfig {
                folha: CredentialRef::Env {
                    env: "PONTO_FOLHA".to_owned(),
                },
                senha: CredentialRef::Keyring {
                    keyring: "senha".to_owned(),
                },
            },
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// contains malformed schedule times.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| PontoError::Config(e.to_string()))?;
        let issues = config.schedule.inline().validation_issues();
        if !issues.is_empty() {
            return Err(PontoError::Config(issues.join("; ")));
        }
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PontoError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `config_dir()/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_dir().join("config.toml")
    }

    /// Check the config for problems that would break a run.
    ///
    /// Returns non-fatal warnings on success.
    ///
    /// # Errors
    ///
    /// Returns [`PontoError::Config`] listing every fatal problem.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let schedule = self.schedule.inline();
        errors.extend(schedule.validation_issues());
        if self.schedule.file.is_none() {
            let days: Vec<String> = match schedule.mode {
                ScheduleMode::Weekly => schedule
                    .weekly
                    .iter()
                    .filter(|(_, plan)| !plan.disabled && !plan.is_active())
                    .map(|(day, _)| day.display_name_pt().to_owned())
                    .collect(),
                ScheduleMode::Monthly => schedule
                    .monthly
                    .iter()
                    .filter(|(_, plan)| !plan.disabled && !plan.is_active())
                    .map(|(date, _)| date.to_string())
                    .collect(),
            };
            for day in days {
                warnings.push(format!("{day} is enabled but has no punch times"));
            }
            let has_active = match schedule.mode {
                ScheduleMode::Weekly => schedule.weekly.values().any(DayPlan::is_active),
                ScheduleMode::Monthly => schedule.monthly.values().any(DayPlan::is_active),
            };
            if !has_active {
                warnings.push("schedule has no active day".to_owned());
            }
        }

        if self.portal.driver_command.trim().is_empty() {
            errors.push("portal.driver_command is empty".to_owned());
        }
        if !self.credentials.folha.is_set() {
            errors.push("credentials.folha is not configured".to_owned());
        }
        if !self.credentials.senha.is_set() {
            errors.push("credentials.senha is not configured".to_owned());
        }
        if self.notifier.kind == NotifierKind::Telegram {
            if !self.notifier.bot_token.is_set() {
                errors.push("notifier.bot_token is required for telegram".to_owned());
            }
            if self.notifier.chat_id.trim().is_empty() {
                errors.push("notifier.chat_id is required for telegram".to_owned());
            }
        }
        if self.engine.verify_attempts == 0 {
            errors.push("engine.verify_attempts must be at least 1".to_owned());
        }
        if self.engine.heartbeat_floor_secs == 0 {
            warnings.push("engine.heartbeat_floor_secs is 0; heartbeats may spin".to_owned());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(PontoError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_retries, 3);
        assert_eq!(engine.retry_interval_ms, 2_000);
        assert_eq!(engine.tolerance_secs, 10);
        assert_eq!(engine.verify_attempts, 10);
        assert_eq!(engine.verify_interval_ms, 5_000);
        assert_eq!(engine.match_tolerance_mins, 2);
        assert_eq!(engine.lookahead_days, 6);

        let settings = engine.settings();
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.heartbeat.far, Duration::from_secs(300));
        assert_eq!(settings.verify_interval, Duration::from_secs(5));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: PontoConfig = toml::from_str("").unwrap();
        assert_eq!(config, PontoConfig::default());
        assert_eq!(config.notifier.kind, NotifierKind::Log);
        assert!(config.schedule.weekly.is_empty());
    }

    #[test]
    fn template_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = PontoConfig::template();
        config.save_to_file(&path).unwrap();
        let loaded = PontoConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.schedule.weekly[&DayOfWeek::Wednesday].saida2, "17:00");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw = r#"
[engine]
max_retries = 5

[portal]
driver_command = "/usr/local/bin/ponto-chromium"
driver_args = ["--headless"]

[credentials]
folha = "12345"
senha = { env = "PONTO_SENHA" }

[schedule.weekly.segunda]
entrada1 = "09:00"
saida1 = "18:00"
"#;
        let config: PontoConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.retry_interval_ms, 2_000);
        assert_eq!(config.portal.request_timeout_secs, 60);
        assert_eq!(config.portal.driver_args, vec!["--headless"]);
        assert_eq!(config.schedule.weekly[&DayOfWeek::Monday].saida1, "18:00");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_time_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[schedule.weekly.monday]\nentrada1 = \"8h\"\n").unwrap();
        let err = PontoConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, PontoError::Config(_)));
    }

    #[test]
    fn validate_flags_missing_credentials_and_telegram_fields() {
        let mut config = PontoConfig::template();
        config.credentials.folha = CredentialRef::None;
        config.notifier.kind = NotifierKind::Telegram;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("credentials.folha"));
        assert!(err.contains("notifier.bot_token"));
        assert!(err.contains("notifier.chat_id"));
    }

    #[test]
    fn validate_warns_on_enabled_empty_day() {
        let mut config = PontoConfig::template();
        config
            .schedule
            .weekly
            .insert(DayOfWeek::Saturday, DayPlan::default());
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("Sábado")));
    }

    #[test]
    fn schedule_file_overrides_inline_tables() {
        let config = ScheduleConfig {
            file: Some(PathBuf::from("/nonexistent/schedule.toml")),
            ..ScheduleConfig::default()
        };
        assert!(config.store().get().is_err());
        assert!(ScheduleConfig::default().store().get().is_ok());
    }
}
