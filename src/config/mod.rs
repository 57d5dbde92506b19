//! Configuration loading.
//!
//! Resolution order, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `<home>/config.json` (or an explicit path)
//! 3. `REGCACHE_*` environment variables (a `.env` file is honoured)
//!
//! `<home>` is `$REGCACHE_HOME`, falling back to `~/.regcache`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Query cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Record directory. Defaults to `<home>/cache/queries`.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| Config::dir().join("cache").join("queries"))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(CacheError::Config(format!(
                "unknown log format '{}' (expected 'pretty' or 'json')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "regcache=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Base directory for config and cache data.
    pub fn dir() -> PathBuf {
        if let Some(home) = std::env::var_os("REGCACHE_HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".regcache")
    }

    /// Default config file path.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path with environment overrides applied.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load from `path` (or the default path) with environment overrides applied.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let default_path = Self::path();
        let path = path.unwrap_or(&default_path);
        let mut config = if path.exists() {
            Self::load_from_path(path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| CacheError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Apply `REGCACHE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("REGCACHE_CACHE_TTL_SECS") {
            self.cache.ttl_secs = raw.trim().parse().map_err(|_| {
                CacheError::Config(format!("REGCACHE_CACHE_TTL_SECS: '{}' is not a number", raw))
            })?;
        }
        if let Some(dir) = lookup("REGCACHE_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("REGCACHE_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(format) = lookup("REGCACHE_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            return Err(CacheError::Config("cache.ttl_secs must be > 0".to_string()));
        }
        Ok(())
    }
}
