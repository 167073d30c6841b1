use crate::error::{IndexBuildError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "index_builds.json";

const DEFAULT_MAX_ACTIVE_BUILDS: usize = 3;
const DEFAULT_INTERRUPT_POLL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Admission ceiling used when a caller does not pass its own.
    pub max_active_builds: usize,
    /// Upper bound on how long a blocked wait sleeps before re-checking its
    /// interrupt, when nobody notifies it.
    pub interrupt_poll_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            max_active_builds: DEFAULT_MAX_ACTIVE_BUILDS,
            interrupt_poll_ms: DEFAULT_INTERRUPT_POLL_MS,
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        RegistryConfig {
            max_active_builds: env::var("INDEX_BUILDS_MAX_ACTIVE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ACTIVE_BUILDS),
            interrupt_poll_ms: env::var("INDEX_BUILDS_INTERRUPT_POLL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_INTERRUPT_POLL_MS),
        }
    }

    /// Load from `{dir}/index_builds.json`, falling back to [`RegistryConfig::from_env`]
    /// when the file is missing, unreadable, malformed or invalid.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE_NAME);

        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!(
                        "Loaded index build config from {}: max_active_builds={}, interrupt_poll_ms={}",
                        path.display(),
                        config.max_active_builds,
                        config.interrupt_poll_ms
                    );
                    return config;
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to load {}: {}, using environment/defaults",
                        path.display(),
                        e
                    );
                }
            }
        }

        let config = Self::from_env();
        tracing::info!(
            "Using index build config from environment: max_active_builds={}, interrupt_poll_ms={}",
            config.max_active_builds,
            config.interrupt_poll_ms
        );
        config
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RegistryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_active_builds == 0 {
            return Err(IndexBuildError::Config(
                "max_active_builds must be at least 1".to_string(),
            ));
        }
        if self.interrupt_poll_ms == 0 {
            return Err(IndexBuildError::Config(
                "interrupt_poll_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interrupt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms)
    }
}
