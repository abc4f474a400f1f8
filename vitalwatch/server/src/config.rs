use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vitalwatch_model::{resolve_model_path, FALLBACK_MODEL_PATH, PRIMARY_MODEL_PATH};

/// Failures while assembling the server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("reading config {}: {source}", path.display())]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Config file is not valid TOML for [`ServerConfig`].
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    /// `PORT` override is not a valid port number.
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Runtime settings for the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// SQLite credential database.
    pub database_path: PathBuf,
    /// Preferred model artifact location.
    pub model_path: PathBuf,
    /// Artifact location tried when `model_path` does not exist.
    pub model_fallback_path: PathBuf,
    /// Optional JSON-lines log file.
    pub log_path: Option<PathBuf>,
    /// Optional JSON-lines event log.
    pub event_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            database_path: PathBuf::from("users.db"),
            model_path: PathBuf::from(PRIMARY_MODEL_PATH),
            model_fallback_path: PathBuf::from(FALLBACK_MODEL_PATH),
            log_path: None,
            event_log: None,
        }
    }
}

impl ServerConfig {
    /// Reads an optional TOML file and applies process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `HOST`, `PORT`, `VITALWATCH_DATABASE` and `VITALWATCH_MODEL_PATH`
    /// as resolved by `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port))?;
        }
        if let Some(database) = lookup("VITALWATCH_DATABASE") {
            self.database_path = PathBuf::from(database);
        }
        if let Some(model) = lookup("VITALWATCH_MODEL_PATH") {
            self.model_path = PathBuf::from(model);
        }
        Ok(self)
    }

    /// `host:port` string for the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// First existing artifact path, falling back to `model_path`.
    #[must_use]
    pub fn resolved_model_path(&self) -> PathBuf {
        resolve_model_path(&self.model_path, &self.model_fallback_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_layout() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.database_path, PathBuf::from("users.db"));
        assert_eq!(config.model_path, PathBuf::from(PRIMARY_MODEL_PATH));
    }

    #[test]
    fn toml_file_keeps_unset_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "port = 9100\nevent_log = \"events.jsonl\"\n").unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.event_log, Some(PathBuf::from("events.jsonl")));
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = ServerConfig::from_toml("host = \"10.0.0.1\"\nport = 9100")
            .unwrap()
            .with_overrides(env(&[
                ("PORT", "8080"),
                ("VITALWATCH_DATABASE", "/tmp/users.db"),
            ]))
            .unwrap();
        assert_eq!(config.bind_address(), "10.0.0.1:8080");
        assert_eq!(config.database_path, PathBuf::from("/tmp/users.db"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = ServerConfig::default()
            .with_overrides(env(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(ref p) if p == "eighty"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/server.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/server.toml"));
    }
}
