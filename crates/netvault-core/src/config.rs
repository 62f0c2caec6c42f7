//! Configuration for the netvault store.
//!
//! Configuration is loaded by the binary from (in priority order):
//! 1. Environment variables (`NETVAULT_STORE__` prefix)
//! 2. Config file (`netvault.toml`, `[store]` section)
//! 3. Defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cooldown::Cooldowns;
use crate::error::CoreError;

/// Store configuration. The store consumes these values but does not own their policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the SQLite data file. Its directory is created if absent.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Idle connections kept open by the pool.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,

    /// How long a connection checkout or a locked write may wait before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Connections are recycled after this many seconds.
    #[serde(default = "default_max_lifetime_secs")]
    pub connection_max_lifetime_secs: u64,

    /// Minimum time after a finished port scan before the device may be port-scanned again.
    #[serde(default = "default_port_scan_cooldown_secs")]
    pub port_scan_cooldown_secs: u64,

    /// Minimum time after a finished web scan before the device may be web-scanned again.
    #[serde(default = "default_web_scan_cooldown_secs")]
    pub web_scan_cooldown_secs: u64,

    /// Lifetime of cached geolocation rows.
    #[serde(default = "default_geo_ttl_hours")]
    pub geo_ttl_hours: u64,
}

impl StoreConfig {
    /// Default configuration pointed at a specific data file.
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(CoreError::Config("db_path must not be empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(CoreError::Config("pool_size must be at least 1".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(CoreError::Config(
                "busy_timeout_ms must be positive".to_string(),
            ));
        }
        if self.min_idle > self.pool_size {
            return Err(CoreError::Config(format!(
                "min_idle ({}) exceeds pool_size ({})",
                self.min_idle, self.pool_size
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// `None` when recycling is disabled (`connection_max_lifetime_secs = 0`).
    pub fn connection_max_lifetime(&self) -> Option<Duration> {
        (self.connection_max_lifetime_secs > 0)
            .then(|| Duration::from_secs(self.connection_max_lifetime_secs))
    }

    pub fn cooldowns(&self) -> Cooldowns {
        Cooldowns {
            port_scan: Duration::from_secs(self.port_scan_cooldown_secs),
            web_scan: Duration::from_secs(self.web_scan_cooldown_secs),
        }
    }

    pub fn geo_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_ttl_hours.saturating_mul(3600))
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/netvault.db")
}

fn default_pool_size() -> u32 {
    15
}

fn default_min_idle() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

fn default_max_lifetime_secs() -> u64 {
    1800
}

fn default_port_scan_cooldown_secs() -> u64 {
    1800
}

fn default_web_scan_cooldown_secs() -> u64 {
    3600
}

fn default_geo_ttl_hours() -> u64 {
    24
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            min_idle: default_min_idle(),
            busy_timeout_ms: default_busy_timeout_ms(),
            connection_max_lifetime_secs: default_max_lifetime_secs(),
            port_scan_cooldown_secs: default_port_scan_cooldown_secs(),
            web_scan_cooldown_secs: default_web_scan_cooldown_secs(),
            geo_ttl_hours: default_geo_ttl_hours(),
        }
    }
}
