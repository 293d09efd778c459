use std::{env, fs, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub children: Vec<ChildSeed>,
    #[serde(default)]
    pub tasks: Vec<TaskSeed>,
    /// IANA timezone the family lives in; streaks and time-of-day
    /// achievement rules are evaluated against it. Defaults to UTC.
    pub timezone: Option<String>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildSeed {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSeed {
    pub id: String,
    pub name: String,
    pub reward_minutes: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Timezone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Timezone(tz) => write!(f, "unknown timezone: {}", tz),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        cfg.tz()?;
        Ok(cfg)
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        match &self.timezone {
            None => Ok(chrono_tz::UTC),
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map_err(|_| ConfigError::Timezone(name.clone())),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            children: Vec::new(),
            tasks: Vec::new(),
            timezone: None,
            dev_cors_origin: None,
            listen_port: None,
        }
    }
}
