use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the orchestration core.
///
/// Every knob has an embedded default so the flow works with no config
/// file at all. Deployments that need the historical variants (longer
/// quiet windows, fewer retry attempts) override per field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Seconds a navigation lock may be held before the watchdog
    /// force-releases it (default: 10)
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// Interval in seconds between lock-age sweeps (default: 5)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_lock_timeout() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl NavigationConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Maximum automatic attempts per file (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay in milliseconds (default: 500)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Cap on the retry delay in milliseconds (default: 8000)
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Trailing quiet window in seconds before "no active upload" is
    /// trusted as "uploads complete" (default: 2)
    #[serde(default = "default_quiet_window")]
    pub quiet_window_secs: u64,
    /// Concurrent upload fan-out during finalization (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    8000
}

fn default_quiet_window() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            quiet_window_secs: default_quiet_window(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl UploadsConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_secs)
    }

    /// Capped exponential backoff delay for a given attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.retry_base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(raw.min(self.retry_max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Default timeout in seconds for tracked operations (default: 30)
    #[serde(default = "default_track_timeout")]
    pub default_timeout_secs: u64,
    /// Seconds a completed record is retained for diagnostics
    /// (default: 60)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_track_timeout() -> u64 {
    30
}

fn default_retention() -> u64 {
    60
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_track_timeout(),
            retention_secs: default_retention(),
        }
    }
}

impl TrackerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter when RUST_LOG is not set (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to a file instead of stderr (default: false)
    #[serde(default)]
    pub to_file: bool,
    /// Directory for log files when `to_file` is set
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            dir: None,
        }
    }
}

impl FlowConfig {
    /// Load configuration in layers: embedded defaults, then an
    /// optional TOML file, then `FORMFLOW_*` environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so the core works without config files
        let defaults = FlowConfig::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides, e.g. FORMFLOW_UPLOADS__MAX_ATTEMPTS=2
        builder = builder.add_source(
            config::Environment::with_prefix("FORMFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to build configuration")?;
        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save the configuration as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
