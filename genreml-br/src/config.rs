//! Configuration for the genreml-br broker
//!
//! Sources, in priority order:
//! 1. Command-line arguments (`ConfigOverrides`, filled by clap which also
//!    reads the matching environment variables)
//! 2. Environment variables (`GENREML_STORE_ROOT`, signing secrets)
//! 3. Optional TOML bootstrap file
//! 4. Built-in defaults
//!
//! Signing secrets are only read from the environment, never from the command
//! line or the TOML file.

use crate::dispatcher::DEFAULT_POLL_WINDOW;
use crate::error::{BrokerError, Result};
use crate::poller::DEFAULT_RESULT_WAIT;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::reaper::DEFAULT_BATCH_TTL;
use genreml_common::config::{load_toml, resolve_store_root, STORE_ROOT_ENV};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Shared secret for worker tokens and sealed results (required)
pub const WORKER_SECRET_ENV: &str = "GENREML_SIGNING_TOKEN";

/// Secret for session cookies (random per process if unset)
pub const SESSION_SECRET_ENV: &str = "SESSION_SIGNING_TOKEN";

/// Model identifier stamped on every work item
pub const MODEL_HASH_ENV: &str = "GENREML_MODEL_HASH";

pub const DEFAULT_PORT: u16 = 5731;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub bind_address: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub store_root: Option<PathBuf>,

    #[serde(default)]
    pub model_hash: Option<String>,

    #[serde(default)]
    pub poll_window_secs: Option<u64>,

    #[serde(default)]
    pub result_wait_secs: Option<u64>,

    #[serde(default)]
    pub batch_ttl_secs: Option<u64>,

    #[serde(default)]
    pub queue_capacity: Option<usize>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub store_root: Option<PathBuf>,
    pub model_hash: Option<String>,
    pub poll_window_secs: Option<u64>,
    pub result_wait_secs: Option<u64>,
    pub batch_ttl_secs: Option<u64>,
    pub queue_capacity: Option<usize>,
}

/// Tunables of the broker core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Artifact store root
    pub store_root: PathBuf,
    /// Model identifier stamped on work items
    pub model_hash: String,
    /// Long-poll window for workers
    pub poll_window: Duration,
    /// Wait for a client result poll
    pub result_wait: Duration,
    /// Lifetime of a batch before the reaper force-deletes it
    pub batch_ttl: Duration,
    /// Capacity of each tier queue
    pub queue_capacity: usize,
}

impl BrokerSettings {
    /// Defaults rooted at `store_root`
    pub fn with_store_root(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            model_hash: "unknown".to_string(),
            poll_window: DEFAULT_POLL_WINDOW,
            result_wait: DEFAULT_RESULT_WAIT,
            batch_ttl: DEFAULT_BATCH_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Complete broker configuration
#[derive(Clone)]
pub struct BrokerConfig {
    pub bind_address: String,
    pub port: u16,
    pub settings: BrokerSettings,
    pub worker_secret: String,
    pub session_secret: Option<String>,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("settings", &self.settings)
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

impl BrokerConfig {
    /// Load the TOML bootstrap (if any) and resolve against the process environment
    pub fn load(toml_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let toml_config = match toml_path {
            Some(path) => {
                let config: TomlConfig = load_toml(path)?;
                info!("Loaded TOML configuration from {:?}", path);
                config
            }
            None => TomlConfig::default(),
        };
        Self::resolve(overrides, toml_config, |key| std::env::var(key).ok())
    }

    /// Merge overrides, TOML values and defaults
    ///
    /// `lookup` supplies environment variables.
    pub fn resolve<F>(overrides: ConfigOverrides, toml_config: TomlConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let worker_secret = non_blank(WORKER_SECRET_ENV)
            .ok_or_else(|| BrokerError::Config(format!("{} is not set", WORKER_SECRET_ENV)))?;
        let session_secret = non_blank(SESSION_SECRET_ENV);

        let store_root = resolve_store_root(
            overrides.store_root.as_deref(),
            STORE_ROOT_ENV,
            toml_config.store_root.as_deref(),
        );

        let defaults = BrokerSettings::with_store_root(store_root);
        let secs = |cli: Option<u64>, toml: Option<u64>, default: Duration| {
            cli.or(toml).map(Duration::from_secs).unwrap_or(default)
        };

        let settings = BrokerSettings {
            model_hash: overrides
                .model_hash
                .or_else(|| non_blank(MODEL_HASH_ENV))
                .or(toml_config.model_hash)
                .unwrap_or(defaults.model_hash),
            poll_window: secs(overrides.poll_window_secs, toml_config.poll_window_secs, defaults.poll_window),
            result_wait: secs(overrides.result_wait_secs, toml_config.result_wait_secs, defaults.result_wait),
            batch_ttl: secs(overrides.batch_ttl_secs, toml_config.batch_ttl_secs, defaults.batch_ttl),
            queue_capacity: overrides
                .queue_capacity
                .or(toml_config.queue_capacity)
                .unwrap_or(defaults.queue_capacity),
            store_root: defaults.store_root,
        };

        if settings.queue_capacity == 0 {
            return Err(BrokerError::Config("queue capacity must be greater than 0".to_string()));
        }

        Ok(Self {
            bind_address: overrides
                .bind_address
                .or(toml_config.bind_address)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: overrides.port.or(toml_config.port).unwrap_or(DEFAULT_PORT),
            settings,
            worker_secret,
            session_secret,
            logging: toml_config.logging,
        })
    }
}
