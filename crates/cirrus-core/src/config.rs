//! Configuration module for Cirrus.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! Every section is optional in the file; missing sections and fields take
//! their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Cirrus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub conflicts: ConflictsConfig,
    pub retry: RetryConfig,
    pub bandwidth: BandwidthConfig,
    pub offline: OfflineConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local replica. A leading `~` is expanded.
    pub root: PathBuf,
    /// Seconds between remote polling cycles.
    pub poll_interval: u64,
    /// Seconds a path must stay quiet before its change is processed.
    pub debounce_delay: u64,
    /// Glob patterns matched against file names; matches are never synced.
    pub exclude_patterns: Vec<String>,
    /// Upper bound on transfers running at the same time.
    pub max_concurrent_transfers: usize,
    /// Seconds before a single transfer is abandoned as timed out.
    pub transfer_timeout_secs: u64,
}

/// Conflict detection and resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Default strategy: `manual`, `keep_local`, `keep_remote`, `keep_both`,
    /// `keep_newer` or `keep_larger`.
    pub default_strategy: String,
    /// Timestamps closer than this (milliseconds) are not considered divergent.
    pub skew_tolerance_ms: u64,
    /// Per-path overrides; the first matching rule wins.
    pub rules: Vec<ConflictRule>,
}

/// Strategy override for paths matching a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Glob matched against the item's logical path, e.g. `/Documents/**/*.docx`.
    pub pattern: String,
    /// Strategy name, same values as `conflicts.default_strategy`.
    pub strategy: String,
}

/// Retry scheduling for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before an operation is reported as failed for good.
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: u64,
    /// Upper bound on any retry delay, in seconds.
    pub max_delay_secs: u64,
}

/// Bandwidth limits. Unset limits mean unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    /// Upload limit in KiB/s.
    pub upload_limit_kbps: Option<u64>,
    /// Download limit in KiB/s.
    pub download_limit_kbps: Option<u64>,
    /// Halve both limits to save power.
    pub power_saving: bool,
}

/// Offline cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Directory holding cached copies.
    pub cache_dir: PathBuf,
    /// Cache budget in MiB.
    pub max_cache_size_mb: u64,
    /// Usage (percent of budget) above which a cleanup is due.
    pub cleanup_threshold_percent: u8,
    /// Entries not accessed for this many days become eligible for eviction.
    pub max_age_days: u32,
    /// Run cleanups automatically when usage crosses the threshold.
    pub auto_cleanup: bool,
}

/// Optional content encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// Directory for encrypted copies staged before upload.
    pub staging_dir: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cirrus/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cirrus")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("cirrus")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Cirrus"),
            poll_interval: 30,
            debounce_delay: 2,
            exclude_patterns: vec![
                ".DS_Store".to_string(),
                "*.tmp".to_string(),
                "Thumbs.db".to_string(),
            ],
            max_concurrent_transfers: 4,
            transfer_timeout_secs: 300,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "manual".to_string(),
            skew_tolerance_ms: 1000,
            rules: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_dir: data_dir().join("cache"),
            max_cache_size_mb: 10240,
            cleanup_threshold_percent: 80,
            max_age_days: 7,
            auto_cleanup: true,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            staging_dir: data_dir().join("staging"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl SyncConfig {
    /// The sync root with `~` expanded.
    pub fn resolved_root(&self) -> PathBuf {
        expand_tilde(&self.root)
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn debounce_duration(&self) -> Duration {
        Duration::from_secs(self.debounce_delay)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

impl OfflineConfig {
    /// The cache directory with `~` expanded.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.cache_dir)
    }

    /// Cache budget in bytes.
    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(1024 * 1024)
    }
}

impl EncryptionConfig {
    /// The staging directory with `~` expanded.
    pub fn resolved_staging_dir(&self) -> PathBuf {
        expand_tilde(&self.staging_dir)
    }
}

impl BandwidthConfig {
    /// Upload limit in bytes per second, before power saving.
    pub fn upload_limit_bytes(&self) -> Option<u64> {
        self.upload_limit_kbps.map(|k| k.saturating_mul(1024))
    }

    /// Download limit in bytes per second, before power saving.
    pub fn download_limit_bytes(&self) -> Option<u64> {
        self.download_limit_kbps.map(|k| k.saturating_mul(1024))
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Upper bound for `conflicts.skew_tolerance_ms`: one hour.
pub const MAX_SKEW_TOLERANCE_MS: u64 = 3_600_000;

/// Valid values for `conflicts.default_strategy` and rule strategies.
pub const VALID_CONFLICT_STRATEGIES: &[&str] = &[
    "manual",
    "keep_local",
    "keep_remote",
    "keep_both",
    "keep_newer",
    "keep_larger",
];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

fn check_strategy(errors: &mut Vec<ValidationError>, field: &str, strategy: &str) {
    if !VALID_CONFLICT_STRATEGIES.contains(&strategy) {
        errors.push(ValidationError {
            field: field.into(),
            message: format!(
                "invalid strategy '{strategy}'; valid options: {}",
                VALID_CONFLICT_STRATEGIES.join(", ")
            ),
        });
    }
}

fn check_pattern(errors: &mut Vec<ValidationError>, field: &str, pattern: &str) {
    if let Err(e) = glob::Pattern::new(pattern) {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("invalid glob pattern '{pattern}': {e}"),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        positive(&mut errors, "sync.poll_interval", self.sync.poll_interval);
        positive(&mut errors, "sync.debounce_delay", self.sync.debounce_delay);
        positive(
            &mut errors,
            "sync.transfer_timeout_secs",
            self.sync.transfer_timeout_secs,
        );
        if self.sync.max_concurrent_transfers == 0 || self.sync.max_concurrent_transfers > 64 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_transfers".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if !self.sync.resolved_root().is_absolute() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("must be an absolute path: {}", self.sync.root.display()),
            });
        }
        for (i, pattern) in self.sync.exclude_patterns.iter().enumerate() {
            check_pattern(&mut errors, &format!("sync.exclude_patterns[{i}]"), pattern);
        }

        // --- conflicts ---
        check_strategy(
            &mut errors,
            "conflicts.default_strategy",
            &self.conflicts.default_strategy,
        );
        if self.conflicts.skew_tolerance_ms > MAX_SKEW_TOLERANCE_MS {
            errors.push(ValidationError {
                field: "conflicts.skew_tolerance_ms".into(),
                message: format!("must be at most {MAX_SKEW_TOLERANCE_MS}"),
            });
        }
        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            check_pattern(&mut errors, &format!("conflicts.rules[{i}].pattern"), &rule.pattern);
            check_strategy(
                &mut errors,
                &format!("conflicts.rules[{i}].strategy"),
                &rule.strategy,
            );
        }

        // --- retry ---
        if self.retry.max_attempts == 0 || self.retry.max_attempts > 100 {
            errors.push(ValidationError {
                field: "retry.max_attempts".into(),
                message: "must be in range 1..=100".into(),
            });
        }
        positive(&mut errors, "retry.base_delay_secs", self.retry.base_delay_secs);
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            errors.push(ValidationError {
                field: "retry.max_delay_secs".into(),
                message: format!(
                    "max_delay_secs ({}) must not be below base_delay_secs ({})",
                    self.retry.max_delay_secs, self.retry.base_delay_secs
                ),
            });
        }

        // --- bandwidth ---
        if let Some(limit) = self.bandwidth.upload_limit_kbps {
            positive(&mut errors, "bandwidth.upload_limit_kbps", limit);
        }
        if let Some(limit) = self.bandwidth.download_limit_kbps {
            positive(&mut errors, "bandwidth.download_limit_kbps", limit);
        }

        // --- offline ---
        positive(
            &mut errors,
            "offline.max_cache_size_mb",
            self.offline.max_cache_size_mb,
        );
        if self.offline.cleanup_threshold_percent == 0
            || self.offline.cleanup_threshold_percent > 100
        {
            errors.push(ValidationError {
                field: "offline.cleanup_threshold_percent".into(),
                message: "must be in range 1..=100".into(),
            });
        }
        positive(
            &mut errors,
            "offline.max_age_days",
            u64::from(self.offline.max_age_days),
        );

        // --- encryption ---
        if self.encryption.enabled && !self.encryption.resolved_staging_dir().is_absolute() {
            errors.push(ValidationError {
                field: "encryption.staging_dir".into(),
                message: "must be an absolute path when encryption is enabled".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use cirrus_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/Cirrus"))
///     .sync_poll_interval(60)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder pre-populated with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_debounce_delay(mut self, seconds: u64) -> Self {
        self.config.sync.debounce_delay = seconds;
        self
    }

    pub fn sync_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.sync.exclude_patterns = patterns;
        self
    }

    pub fn sync_max_concurrent_transfers(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_transfers = n;
        self
    }

    pub fn sync_transfer_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.transfer_timeout_secs = seconds;
        self
    }

    // --- conflicts ---

    pub fn conflicts_default_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.default_strategy = strategy.into();
        self
    }

    pub fn conflicts_skew_tolerance_ms(mut self, ms: u64) -> Self {
        self.config.conflicts.skew_tolerance_ms = ms;
        self
    }

    pub fn conflicts_rule(mut self, pattern: impl Into<String>, strategy: impl Into<String>) -> Self {
        self.config.conflicts.rules.push(ConflictRule {
            pattern: pattern.into(),
            strategy: strategy.into(),
        });
        self
    }

    // --- retry ---

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_base_delay_secs(mut self, seconds: u64) -> Self {
        self.config.retry.base_delay_secs = seconds;
        self
    }

    pub fn retry_max_delay_secs(mut self, seconds: u64) -> Self {
        self.config.retry.max_delay_secs = seconds;
        self
    }

    // --- bandwidth ---

    pub fn bandwidth_upload_limit_kbps(mut self, kbps: Option<u64>) -> Self {
        self.config.bandwidth.upload_limit_kbps = kbps;
        self
    }

    pub fn bandwidth_download_limit_kbps(mut self, kbps: Option<u64>) -> Self {
        self.config.bandwidth.download_limit_kbps = kbps;
        self
    }

    pub fn bandwidth_power_saving(mut self, enabled: bool) -> Self {
        self.config.bandwidth.power_saving = enabled;
        self
    }

    // --- offline ---

    pub fn offline_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.offline.cache_dir = dir;
        self
    }

    pub fn offline_max_cache_size_mb(mut self, mb: u64) -> Self {
        self.config.offline.max_cache_size_mb = mb;
        self
    }

    pub fn offline_cleanup_threshold_percent(mut self, percent: u8) -> Self {
        self.config.offline.cleanup_threshold_percent = percent;
        self
    }

    pub fn offline_max_age_days(mut self, days: u32) -> Self {
        self.config.offline.max_age_days = days;
        self
    }

    pub fn offline_auto_cleanup(mut self, enabled: bool) -> Self {
        self.config.offline.auto_cleanup = enabled;
        self
    }

    // --- encryption ---

    pub fn encryption_enabled(mut self, enabled: bool) -> Self {
        self.config.encryption.enabled = enabled;
        self
    }

    pub fn encryption_staging_dir(mut self, dir: PathBuf) -> Self {
        self.config.encryption.staging_dir = dir;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
