//! Photo match service configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub matching: MatchingConfig,
    pub cache: CacheConfig,
    pub signin: SignInConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Expose internal error details in 500 responses
    pub debug_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Similarity threshold for read-only match checks (0-100)
    pub check_threshold: f64,
    /// Similarity threshold for recording new matches (0-100)
    pub update_threshold: f64,
    /// Maximum index hits considered per search
    pub max_faces: usize,
    /// Trailing window for "recent" match stats
    pub recent_window_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInConfig {
    /// Upper bound on the sign-in match check
    pub check_timeout_ms: u64,
    /// Minimum interval between sign-in-triggered match updates
    pub update_interval_hours: u64,
    pub update_queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub sqlite_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Apply environment overrides. `PHOTOMATCH_DEBUG=1` forces error-detail
    /// exposure regardless of the config file.
    pub fn apply_env_overrides(&mut self) {
        if std::env::var("PHOTOMATCH_DEBUG").map(|v| v == "1").unwrap_or(false) {
            self.server.debug_errors = true;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                debug_errors: false,
            },
            matching: MatchingConfig {
                check_threshold: 80.0,
                update_threshold: 98.0,
                max_faces: 1000,
                recent_window_hours: 24,
            },
            cache: CacheConfig {
                ttl_secs: 300,
                sweep_interval_secs: 60,
            },
            signin: SignInConfig {
                check_timeout_ms: 3000,
                update_interval_hours: 24,
                update_queue_depth: 256,
            },
            storage: StorageConfig {
                sqlite_path: Some(PathBuf::from("data/matches.db")),
            },
        }
    }
}
