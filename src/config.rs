//! Application-level configuration loading, including the debounce and eviction timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONGSHEET_SYNC_CONFIG_PATH";
/// Quiet period after the last song change before the history entry is written.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);
/// Idle period after which an unused session actor is evicted.
pub const DEFAULT_IDLE_EVICTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    debounce_window: Duration,
    idle_eviction: Option<Duration>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        debounce_ms = app_config.debounce_window.as_millis() as u64,
                        idle_eviction = ?app_config.idle_eviction,
                        "loaded session settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; omitted keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Build a configuration with explicit timings.
    pub fn new(debounce_window: Duration, idle_eviction: Option<Duration>) -> Self {
        Self {
            debounce_window,
            idle_eviction,
        }
    }

    /// Quiet period used by the history write scheduler.
    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// Idle period before an unused session actor stops, `None` when eviction is disabled.
    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            idle_eviction: Some(DEFAULT_IDLE_EVICTION),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    debounce_window_ms: Option<u64>,
    /// `0` disables eviction.
    idle_eviction_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let debounce_window = value
            .debounce_window_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE_WINDOW);
        let idle_eviction = match value.idle_eviction_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_IDLE_EVICTION),
        };
        Self {
            debounce_window,
            idle_eviction,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
