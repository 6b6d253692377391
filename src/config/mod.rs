//! Application configuration.
//!
//! Aggregates configuration for all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PUNCHCARD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PUNCHCARD";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PUNCHCARD_LOG";

/// Default QR token validity (one rotation period).
pub const DEFAULT_QR_VALIDITY_SECS: i64 = 900;
/// Default notification dedup window.
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 30;
/// Default per-actor scan budget per window.
pub const DEFAULT_RATE_LIMIT_MAX_HITS: u64 = 30;
/// Default rate-limit window.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// QR signature configuration.
    pub signature: SignatureConfig,
    /// Notification configuration.
    pub notifications: NotificationConfig,
    /// Rate limit configuration.
    pub rate_limit: RateLimitConfig,
}

/// Ledger database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Use `:memory:` for in-memory.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
        }
    }
}

/// QR signing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Server-held signing secret. Must be set for production use.
    pub secret: String,
    /// Token validity window in seconds; matches the QR rotation cycle.
    pub validity_secs: i64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            validity_secs: DEFAULT_QR_VALIDITY_SECS,
        }
    }
}

/// Notification deduplication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Recency window within which same-kind/same-subject notifications
    /// are merged.
    pub dedup_window_secs: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
        }
    }
}

/// Per-actor rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum award requests per actor per window.
    pub max_hits: u64,
    /// Fixed window length in seconds.
    pub window_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_hits: DEFAULT_RATE_LIMIT_MAX_HITS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `PUNCHCARD_CONFIG` environment variable (if set)
    /// 4. Environment variables with `PUNCHCARD` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            signature: SignatureConfig {
                secret: "test-secret".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
