//! # Engine Configuration
//!
//! Settings for the scheduler daemon, read from a single YAML file. A missing file is
//! created with the defaults so operators have something to edit.
//!
//! ## YAML Format
//!
//! ```yaml
//! database_url: "sqlite:ledger-engine.db"
//! log_filter: "info"
//! jobs:
//!   payment_check_minutes: 60
//!   reminders_minutes: 360
//!   recurrence_rollover_minutes: 1440
//!   cleanup_minutes: 1440
//! stale_after_minutes: 120
//! notification_retention_days: 90
//! execution_retention_days: 30
//! currency:
//!   symbol: "$"
//!   decimal_separator: "."
//!   thousands_separator: ","
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::domain::money::CurrencyFormat;
use crate::backend::storage::sqlite::DEFAULT_DATABASE_URL;

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "LEDGER_ENGINE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "ledger-engine.yaml";

/// How often each scheduled job runs, in minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobIntervals {
    pub payment_check_minutes: u64,
    pub reminders_minutes: u64,
    pub recurrence_rollover_minutes: u64,
    pub cleanup_minutes: u64,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            payment_check_minutes: 60,
            reminders_minutes: 6 * 60,
            recurrence_rollover_minutes: 24 * 60,
            cleanup_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    pub jobs: JobIntervals,
    /// Runs still marked running after this long are treated as crashed
    pub stale_after_minutes: i64,
    /// Read notifications older than this are purged
    pub notification_retention_days: i64,
    /// Finished job executions older than this are purged
    pub execution_retention_days: i64,
    pub currency: CurrencyFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_filter: "info".to_string(),
            jobs: JobIntervals::default(),
            stale_after_minutes: 120,
            notification_retention_days: 90,
            execution_retention_days: 30,
            currency: CurrencyFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Location of the config file, honoring [`CONFIG_PATH_ENV`]
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load the config, writing the defaults first if the file doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let yaml_content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            let config: EngineConfig = serde_yaml::from_str(&yaml_content)
                .with_context(|| format!("Invalid config {:?}", path))?;
            config.validate()?;
            debug!("Loaded engine config from {:?}", path);
            Ok(config)
        } else {
            let config = EngineConfig::default();
            config.save(path)?;
            info!("Created default engine config at {:?}", path);
            Ok(config)
        }
    }

    /// Write the config atomically through a temp file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml_content = serde_yaml::to_string(self)?;
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, yaml_content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("payment_check_minutes", self.jobs.payment_check_minutes),
            ("reminders_minutes", self.jobs.reminders_minutes),
            ("recurrence_rollover_minutes", self.jobs.recurrence_rollover_minutes),
            ("cleanup_minutes", self.jobs.cleanup_minutes),
        ];
        for (name, minutes) in intervals {
            if minutes == 0 {
                anyhow::bail!("jobs.{} must be greater than zero", name);
            }
        }
        if self.stale_after_minutes <= 0 {
            anyhow::bail!("stale_after_minutes must be greater than zero");
        }
        if self.notification_retention_days < 0 || self.execution_retention_days < 0 {
            anyhow::bail!("retention windows cannot be negative");
        }
        Ok(())
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }

    pub fn notification_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.notification_retention_days)
    }

    pub fn execution_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.execution_retention_days)
    }
}

impl JobIntervals {
    pub fn payment_check(&self) -> Duration {
        Duration::from_secs(self.payment_check_minutes * 60)
    }

    pub fn reminders(&self) -> Duration {
        Duration::from_secs(self.reminders_minutes * 60)
    }

    pub fn recurrence_rollover(&self) -> Duration {
        Duration::from_secs(self.recurrence_rollover_minutes * 60)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_minutes * 60)
    }
}
