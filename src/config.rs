//! Application configuration.
//!
//! Layered with figment, later layers winning: built-in defaults, the TOML
//! file, `ANKILINK_*` environment variables, then command-line overrides.
//! The result is read once at start-up and handed to the constructors that
//! need it; nothing reads configuration afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::rpc::{OriginPolicy, ServerOptions};

/// File read when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "ankilink.toml";

const ENV_PREFIX: &str = "ANKILINK_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    pub bind_port: u16,
    pub backlog: u32,
    /// Shared secret every call except `requestPermission` must carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
    /// Deprecated single-origin form of `cors_origins`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,
    /// Origins whose permission requests are denied without asking.
    pub ignore_origins: Vec<String>,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_request_bytes: usize,
    /// Grant permission requests from unknown origins instead of denying them.
    pub grant_permission_requests: bool,
    pub verbose: bool,
    pub log_json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let server = ServerOptions::default();
        Self {
            bind_address: server.bind_address,
            bind_port: server.bind_port,
            backlog: server.backlog,
            api_key: None,
            cors_origins: vec![crate::rpc::origin::FALLBACK_ORIGIN.to_string()],
            cors_origin: None,
            ignore_origins: Vec::new(),
            timeout_ms: server.timeout.as_millis() as u64,
            poll_interval_ms: 25,
            max_request_bytes: server.max_request_bytes,
            grant_permission_requests: false,
            verbose: false,
            log_json: false,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load the configuration.
    ///
    /// `path` names the TOML file; when `None` the default file is used if
    /// present. `overrides` is any serializable set of command-line values,
    /// whose absent fields must be skipped during serialization.
    pub fn load<T: Serialize>(path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} does not exist", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract().context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Effective allow-list, including the deprecated single origin.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = self.cors_origins.clone();
        if let Some(origin) = &self.cors_origin {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        origins
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(self.allowed_origins(), self.ignore_origins.clone())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            bind_address: self.bind_address.clone(),
            bind_port: self.bind_port,
            backlog: self.backlog,
            timeout: Duration::from_millis(self.timeout_ms),
            max_request_bytes: self.max_request_bytes,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `host:port` a client on this machine should connect to.
    pub fn client_addr(&self) -> String {
        let host = match self.bind_address.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "::1",
            host => host,
        };
        if host.contains(':') {
            format!("[{host}]:{}", self.bind_port)
        } else {
            format!("{host}:{}", self.bind_port)
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.log_json,
            verbose: self.verbose,
            file: self.log_file.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        bind_port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verbose: Option<bool>,
    }

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("ankilink.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.bind_port, 8765);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.cors_origins, vec!["http://localhost".to_string()]);
        assert_eq!(config.timeout_ms, 5000);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
bind_port = 9000
api_key = "secret"
cors_origins = ["*"]
"#,
        );

        let config = AppConfig::load(Some(&path), None::<&Overrides>).unwrap();

        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "bind_port = 9000\nverbose = false\n");
        let overrides = Overrides {
            bind_port: Some(9100),
            verbose: None,
        };

        let config = AppConfig::load(Some(&path), Some(&overrides)).unwrap();

        assert_eq!(config.bind_port, 9100);
        assert!(!config.verbose);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(AppConfig::load(Some(&path), None::<&Overrides>).is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "poll_interval_ms = 0\n");

        assert!(AppConfig::load(Some(&path), None::<&Overrides>).is_err());
    }

    #[test]
    fn deprecated_origin_joins_allow_list() {
        let config = AppConfig {
            cors_origin: Some("https://example.org".to_string()),
            ..AppConfig::default()
        };

        assert_eq!(
            config.allowed_origins(),
            vec!["http://localhost".to_string(), "https://example.org".to_string()]
        );
        assert!(config.origin_policy().decide(Some("https://example.org")).allowed);
    }

    #[test]
    fn client_addr_avoids_wildcard_hosts() {
        let mut config = AppConfig::default();
        assert_eq!(config.client_addr(), "127.0.0.1:8765");

        config.bind_address = "0.0.0.0".to_string();
        assert_eq!(config.client_addr(), "127.0.0.1:8765");

        config.bind_address = "::".to_string();
        assert_eq!(config.client_addr(), "[::1]:8765");
    }

    #[test]
    fn toml_output_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = AppConfig {
            bind_port: 9200,
            ignore_origins: vec!["https://spam.example".to_string()],
            ..AppConfig::default()
        };
        let path = write_config(&dir, &original.to_toml().unwrap());

        let loaded = AppConfig::load(Some(&path), None::<&Overrides>).unwrap();
        assert_eq!(loaded, original);
    }
}
