use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ResultExt, TrackerError, TrackerResult};
use crate::notification::AlertPolicy;

const ENV_DATABASE_URL: &str = "MOTO_TRACKER_DATABASE_URL";
const ENV_AUTH_TOKEN: &str = "MOTO_TRACKER_AUTH_TOKEN";
const ENV_PUSH_TOKEN: &str = "MOTO_TRACKER_PUSH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Realtime database root, e.g. `https://<project>.firebasedatabase.app`
    #[serde(default)]
    pub database_url: Option<String>,
    /// Database secret or ID token appended as `?auth=`
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_data_path")]
    pub data_path: String,
    /// Expo push token of the device that receives vibration alerts
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default = "default_push_endpoint")]
    pub push_endpoint: String,
    #[serde(default)]
    pub alert_policy: AlertPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_data_path() -> String {
    "motorcycle/data".to_string()
}

fn default_push_endpoint() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

fn default_request_timeout_secs() -> u64 {
    crate::timeouts::REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            auth_token: None,
            data_path: default_data_path(),
            push_token: None,
            push_endpoint: default_push_endpoint(),
            alert_policy: AlertPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moto-tracker")
            .join("config.json")
    }

    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> TrackerResult<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> TrackerResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_tracker_err(|e| TrackerError::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&contents)
            .map_tracker_err(|e| TrackerError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self) -> TrackerResult<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> TrackerResult<()> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_tracker_err(|e| {
                TrackerError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        fs::write(path, contents)
            .map_tracker_err(|e| TrackerError::Config(format!("Failed to write config: {}", e)))
    }

    /// Connection parameters supplied at process start win over the file
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(token) = non_empty(ENV_AUTH_TOKEN) {
            self.auth_token = Some(token);
        }
        if let Some(token) = non_empty(ENV_PUSH_TOKEN) {
            self.push_token = Some(token);
        }
    }

    pub fn require_database_url(&self) -> TrackerResult<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                TrackerError::Config(format!(
                    "database_url is not set (config file or {})",
                    ENV_DATABASE_URL
                ))
            })
    }

    /// Copy safe to hand to the frontend
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| "********".to_string());
        Self {
            auth_token: mask(&self.auth_token),
            push_token: mask(&self.push_token),
            ..self.clone()
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
