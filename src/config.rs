//! Engine configuration, loaded from YAML

use crate::fragment::RefreshPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on concurrently running pulls, whatever the config says
pub const HARD_CAP: usize = 64;

/// Largest accepted refresh bound (30 days)
pub const MAX_REFRESH_SECS: f64 = 30.0 * 24.0 * 3600.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CuratorConfig {
    /// Scheduler tick interval in milliseconds
    pub tick_ms: u64,
    /// Requested worker pool size, capped at [`HARD_CAP`]
    pub max_concurrent_fragments: usize,
    /// Concurrency hint passed to the pattern resolver
    pub resolver_concurrency: usize,
    /// Pulls faster than this may be parked on-demand
    pub on_demand_threshold_secs: f64,
    /// Lower bound of the synced TTL
    pub min_sync_secs: f64,
    pub lock_lease_secs: u64,
    pub lock_retry_ms: u64,
    /// Plugins to instantiate, by id
    pub plugins: Vec<String>,
    /// SQLite database path; the platform data dir when unset
    pub db: Option<PathBuf>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            max_concurrent_fragments: 8,
            resolver_concurrency: 8,
            on_demand_threshold_secs: 2.0,
            min_sync_secs: 10.0,
            lock_lease_secs: 300,
            lock_retry_ms: 20,
            plugins: vec!["trace".to_string()],
            db: None,
        }
    }
}

impl CuratorConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_ms == 0 {
            return Err(invalid("tick_ms", "must be positive"));
        }
        if self.max_concurrent_fragments == 0 {
            return Err(invalid("max_concurrent_fragments", "must be positive"));
        }
        if self.resolver_concurrency == 0 {
            return Err(invalid("resolver_concurrency", "must be positive"));
        }
        for (field, value) in [
            ("on_demand_threshold_secs", self.on_demand_threshold_secs),
            ("min_sync_secs", self.min_sync_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{} is not a non-negative number", value)));
            }
            if value > MAX_REFRESH_SECS {
                return Err(invalid(field, format!("{} exceeds {} seconds", value, MAX_REFRESH_SECS)));
            }
        }
        if self.lock_lease_secs == 0 {
            return Err(invalid("lock_lease_secs", "must be positive"));
        }
        if self.lock_retry_ms == 0 {
            return Err(invalid("lock_retry_ms", "must be positive"));
        }
        Ok(())
    }

    /// Effective worker pool size
    pub fn pool_size(&self) -> usize {
        self.max_concurrent_fragments.min(HARD_CAP)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms.max(1))
    }

    /// Refresh bounds, clamped to `[0, MAX_REFRESH_SECS]` for configs that
    /// skipped validation
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(
            bounded_secs(self.on_demand_threshold_secs),
            bounded_secs(self.min_sync_secs),
        )
    }

    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    pub fn with_max_concurrent_fragments(mut self, n: usize) -> Self {
        self.max_concurrent_fragments = n;
        self
    }

    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_refresh(mut self, on_demand_threshold_secs: f64, min_sync_secs: f64) -> Self {
        self.on_demand_threshold_secs = on_demand_threshold_secs;
        self.min_sync_secs = min_sync_secs;
        self
    }

    pub fn with_lock_retry_ms(mut self, ms: u64) -> Self {
        self.lock_retry_ms = ms;
        self
    }
}

fn bounded_secs(value: f64) -> Duration {
    if value.is_finite() {
        Duration::from_secs_f64(value.clamp(0.0, MAX_REFRESH_SECS))
    } else {
        Duration::ZERO
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Default database path (`<data dir>/curator/curator.db`)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("curator").join("curator.db")
}
