//! Configuration for sysdeck.
//!
//! Two files are involved. [`Config`] is the operator-facing config file
//! (`<config_dir>/sysdeck/config.json`). [`Settings`] are the user
//! preferences served and edited over the API, stored under the data path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::retention::TierBasis;
use crate::error::ConfigError;

pub const DEFAULT_STATIC_PORT: u16 = 47800;
pub const DEFAULT_PUSH_PORT: u16 = 47801;
pub const DEFAULT_API_PORT: u16 = 47802;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the database, settings, token and logs
    pub data_path: PathBuf,

    /// Stats tick period (record + publish)
    #[serde(with = "duration_serde")]
    pub stats_interval: Duration,

    /// Tray label refresh period
    #[serde(with = "duration_serde")]
    pub tray_interval: Duration,

    /// Period of the 30-day expiry sweep
    #[serde(with = "duration_serde")]
    pub expiry_interval: Duration,

    /// How the retention tier is chosen
    pub tier_basis: TierBasis,

    /// Gateway listener addresses
    pub gateway: PortConfig,

    /// Directory of static assets for the web dashboard
    pub web_root: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sysdeck");

        Self {
            data_path: data_dir,
            stats_interval: Duration::from_secs(1),
            tray_interval: Duration::from_secs(2),
            expiry_interval: Duration::from_secs(3600),
            tier_basis: TierBasis::default(),
            gateway: PortConfig::default(),
            web_root: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(path, self)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sysdeck")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [self.data_path.clone(), self.runtime_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path.join("history.db")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_path.join("settings.json")
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.data_path.join("runtime")
    }

    pub fn token_path(&self) -> PathBuf {
        self.runtime_dir().join("gateway.token")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_path.join("logs")
    }
}

/// Ports for the three gateway endpoints. Port 0 picks a free port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub host: String,
    pub static_port: u16,
    pub push_port: u16,
    pub api_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            static_port: DEFAULT_STATIC_PORT,
            push_port: DEFAULT_PUSH_PORT,
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl PortConfig {
    /// All three endpoints on OS-assigned ports.
    pub fn ephemeral() -> Self {
        Self {
            static_port: 0,
            push_port: 0,
            api_port: 0,
            ..Self::default()
        }
    }
}

/// Color scheme of the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

/// User preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: Theme,
    pub auto_start: bool,
    pub web_access_enabled: bool,
    /// IANA timezone names shown as world clocks
    pub world_clocks: Vec<String>,
    pub show_temperature: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            auto_start: false,
            web_access_enabled: false,
            world_clocks: vec!["UTC".to_string()],
            show_temperature: true,
        }
    }
}

impl Settings {
    /// Reject unknown timezone names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in &self.world_clocks {
            name.parse::<chrono_tz::Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(name.clone()))?;
        }
        Ok(())
    }
}

/// Result of [`SettingsStore::apply_patch`].
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub settings: Settings,
    pub theme_changed: bool,
}

/// Current settings plus where they are persisted.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Settings>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Load from `path`. Missing or unreadable files yield defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        Self {
            current: RwLock::new(settings),
            path: Some(path),
        }
    }

    /// Settings that live only in memory.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings),
            path: None,
        }
    }

    pub fn get(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge a JSON object into the current settings, validate, and persist.
    ///
    /// `webAccessEnabled` is ignored here; it only changes through
    /// [`set_web_access`](Self::set_web_access) so the gateway stays in step.
    pub fn apply_patch(&self, patch: &serde_json::Value) -> Result<SettingsChange, ConfigError> {
        let fields = patch
            .as_object()
            .ok_or_else(|| ConfigError::Parse("settings patch must be a JSON object".into()))?;

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut merged =
            serde_json::to_value(&*guard).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in fields {
                if key != "webAccessEnabled" {
                    target.insert(key.clone(), value.clone());
                }
            }
        }

        let next: Settings =
            serde_json::from_value(merged).map_err(|e| ConfigError::Parse(e.to_string()))?;
        next.validate()?;

        let theme_changed = next.theme != guard.theme;
        self.persist(&next)?;
        *guard = next.clone();
        Ok(SettingsChange {
            settings: next,
            theme_changed,
        })
    }

    pub fn set_auto_start(&self, enabled: bool) -> Result<Settings, ConfigError> {
        self.update(|s| s.auto_start = enabled)
    }

    pub fn set_web_access(&self, enabled: bool) -> Result<Settings, ConfigError> {
        self.update(|s| s.web_access_enabled = enabled)
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings, ConfigError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        f(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            write_json(path, settings)?;
            info!("Settings saved to {:?}", path);
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
    }
    let content =
        serde_json::to_string_pretty(value).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
