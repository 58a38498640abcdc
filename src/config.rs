// src/config.rs
//! Application configuration: YAML file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConsoleError, Result};

const DEFAULT_CONFIG_FILE: &str = "luna.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub stream_endpoint: String,
    pub app_lang: String,
    pub use_sop: bool,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub log_dir: PathBuf,
    pub token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            stream_endpoint: "luna2chat-sse".to_string(),
            app_lang: "en".to_string(),
            use_sop: false,
            request_timeout_secs: 30,
            stream_idle_timeout_secs: 120,
            log_dir: PathBuf::from("./logs"),
            token: None,
        }
    }
}

impl AppConfig {
    /// Load from `$LUNA_CONFIG` (or `./luna.yaml` if it exists), then apply
    /// `LUNA_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LUNA_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from any key lookup. `load` passes the process
    /// environment; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LUNA_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(lang) = lookup("LUNA_APP_LANG") {
            self.app_lang = lang;
        }
        if let Some(token) = lookup("LUNA_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(endpoint) = lookup("LUNA_STREAM_ENDPOINT") {
            self.stream_endpoint = endpoint;
        }
        if let Some(dir) = lookup("LUNA_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(ConsoleError::Config(format!(
                "api_base_url must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }
        if self.request_timeout_secs == 0 || self.stream_idle_timeout_secs == 0 {
            return Err(ConsoleError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.stream_endpoint.trim().is_empty() {
            return Err(ConsoleError::Config("stream_endpoint must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml("api_base_url: \"https://luna.example\"\nuse_sop: true\n").unwrap();
        assert_eq!(config.api_base_url, "https://luna.example");
        assert!(config.use_sop);
        assert_eq!(config.stream_endpoint, "luna2chat-sse");
        assert_eq!(config.stream_idle_timeout_secs, 120);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LUNA_API_BASE_URL", "http://10.0.0.2:9000"),
            ("LUNA_APP_LANG", "zh"),
            ("LUNA_TOKEN", ""),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "http://10.0.0.2:9000");
        assert_eq!(config.app_lang, "zh");
        // empty token is treated as unset
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.api_base_url = "localhost:8000".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream_idle_timeout_secs = 0;
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("luna.yaml");
        std::fs::write(&path, "app_lang: fr\nrequest_timeout_secs: 5\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.app_lang, "fr");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }
}
