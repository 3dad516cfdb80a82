//! Timeouts and thresholds for lookups, settle detection and commands.
//!
//! Priority for the configuration file:
//! 1. An explicit path passed by the caller
//! 2. `ORCHESTRA_CONFIG` (ignored when empty)
//! 3. `~/.orchestra/config.json` (only if it exists)
//! 4. Built-in defaults
//!
//! `ORCHESTRA_LOOKUP_TIMEOUT_MS` and `ORCHESTRA_OPTIONAL_LOOKUP_TIMEOUT_MS`
//! override the two lookup deadlines after the file is loaded.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "ORCHESTRA_CONFIG";
pub const LOOKUP_TIMEOUT_ENV: &str = "ORCHESTRA_LOOKUP_TIMEOUT_MS";
pub const OPTIONAL_LOOKUP_TIMEOUT_ENV: &str = "ORCHESTRA_OPTIONAL_LOOKUP_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    /// Deadline for required element lookups.
    pub lookup_timeout_ms: u64,
    /// Deadline for lookups of selectors marked optional.
    pub optional_lookup_timeout_ms: u64,
    /// Pause between hierarchy fetches while waiting for an element.
    pub lookup_poll_interval_ms: u64,
    /// Maximum screenshot difference, in percent, still counted as static.
    pub screen_static_threshold: f64,
    /// Pause between screenshot pairs.
    pub screen_static_interval_ms: u64,
    /// Pause between hierarchy fetches while waiting for the app to settle.
    pub settle_interval_ms: u64,
    pub settle_max_iterations: u32,
    pub scroll_until_visible_timeout_ms: u64,
    pub wait_for_animation_timeout_ms: u64,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 15_000,
            optional_lookup_timeout_ms: 3_000,
            lookup_poll_interval_ms: 100,
            screen_static_threshold: 0.005,
            screen_static_interval_ms: 100,
            settle_interval_ms: 200,
            settle_max_iterations: 10,
            scroll_until_visible_timeout_ms: 20_000,
            wait_for_animation_timeout_ms: 15_000,
        }
    }
}

impl OrchestraConfig {
    /// Load from the first available source, then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> std::io::Result<Self> {
        let mut config = match config_path(explicit) {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Apply the per-value env overrides; empty or unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_millis(LOOKUP_TIMEOUT_ENV) {
            self.lookup_timeout_ms = ms;
        }
        if let Some(ms) = env_millis(OPTIONAL_LOOKUP_TIMEOUT_ENV) {
            self.optional_lookup_timeout_ms = ms;
        }
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn optional_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.optional_lookup_timeout_ms)
    }

    pub fn lookup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lookup_poll_interval_ms)
    }

    pub fn screen_static_interval(&self) -> Duration {
        Duration::from_millis(self.screen_static_interval_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn scroll_until_visible_timeout(&self) -> Duration {
        Duration::from_millis(self.scroll_until_visible_timeout_ms)
    }

    pub fn wait_for_animation_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_animation_timeout_ms)
    }
}

/// Resolve which configuration file to read, if any.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".orchestra").join("config.json"))
        .filter(|path| path.is_file())
}

fn env_millis(name: &str) -> Option<u64> {
    let raw = env::var(name).ok().filter(|v| !v.trim().is_empty())?;
    match raw.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number of milliseconds", name, raw);
            None
        }
    }
}
