use crate::hardware::DeviceFixture;
use crate::path;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use zbus::names::WellKnownName;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bus connection and object layout
    #[serde(default)]
    pub bus: BusConfig,

    /// Devices served by the in-memory hardware backend
    #[serde(default)]
    pub devices: Vec<DeviceFixture>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
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

/// Which message bus to connect to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Per-user session bus
    #[default]
    Session,
    /// System-wide bus (needs a bus policy granting the name)
    System,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Session => f.write_str("session"),
            BusKind::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default)]
    pub kind: BusKind,

    /// Well-known bus name to request
    #[serde(default = "default_bus_name")]
    pub name: String,

    /// Root object path; the manager lives here and every node below it
    #[serde(default = "default_root")]
    pub root: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            name: default_bus_name(),
            root: default_root(),
        }
    }
}

fn default_bus_name() -> String {
    "org.example.devicemgr1".to_string()
}

fn default_root() -> String {
    "/org/example/devicemgr1".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("org", "example", "devicemgrd")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default file, or create it with defaults if it
    /// does not exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load config from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if given, else from the default location
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    /// Parse and validate TOML
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        path::validate_root(&self.bus.root)
            .map_err(|e| ConfigError::ValidationError(format!("bus root: {}", e)))?;

        WellKnownName::try_from(self.bus.name.as_str()).map_err(|e| {
            ConfigError::ValidationError(format!("bus name '{}': {}", self.bus.name, e))
        })?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "device name must not be empty".into(),
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }

            if device.profiles.iter().filter(|p| p.active).count() > 1 {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}' has more than one active profile",
                    device.name
                )));
            }
            if device.profiles.iter().filter(|p| p.default).count() > 1 {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}' has more than one default profile",
                    device.name
                )));
            }

            for (index, profile) in device.profiles.iter().enumerate() {
                if profile.resolutions.iter().filter(|r| r.active).count() > 1 {
                    return Err(ConfigError::ValidationError(format!(
                        "profile {} of '{}' has more than one active resolution",
                        index, device.name
                    )));
                }
                if profile.resolutions.iter().filter(|r| r.default).count() > 1 {
                    return Err(ConfigError::ValidationError(format!(
                        "profile {} of '{}' has more than one default resolution",
                        index, device.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create config directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        info!("Config saved to: {}", path.display());
        Ok(())
    }
}

/// Show current configuration
pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load_or_default(path)?;
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };

    println!("Config file: {}\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
