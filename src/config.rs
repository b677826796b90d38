//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::LimiterConfig;

/// Prefix for environment overrides, e.g. `TURNSTILE__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Interval between sweeps of expired windows, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Named limiter policies
    #[serde(default = "default_limiters")]
    pub limiters: BTreeMap<String, LimiterPolicy>,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sweep_interval_ms: default_sweep_interval_ms(),
            limiters: default_limiters(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// How a policy identifies callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Client address from proxy headers
    #[default]
    Ip,
    /// Authenticated user id, falling back to the client address
    User,
}

/// One named quota policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterPolicy {
    /// Requests admitted per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Caller identity used as the key
    #[serde(default)]
    pub key: KeyStrategy,
}

impl LimiterPolicy {
    /// The validated limiter configuration for this policy.
    pub fn limiter_config(&self) -> Result<LimiterConfig> {
        LimiterConfig::new(self.max_requests, self.window_ms)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_limiters() -> BTreeMap<String, LimiterPolicy> {
    BTreeMap::from([
        (
            "api".to_string(),
            LimiterPolicy {
                max_requests: 60,
                window_ms: 60_000,
                key: KeyStrategy::Ip,
            },
        ),
        (
            "debate".to_string(),
            LimiterPolicy {
                max_requests: 10,
                window_ms: 60_000,
                key: KeyStrategy::User,
            },
        ),
    ])
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    ///
    /// Layers, lowest first: built-in defaults, the file, then `TURNSTILE__*`
    /// variables. A partial override merges onto the layer below it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, environment())
    }

    fn load_layered(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&TurnstileConfig::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let mut config: TurnstileConfig = builder.add_source(env).build()?.try_deserialize()?;

        config.normalize_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// The document is taken as-is: a `limiters` table replaces the default
    /// policies rather than merging onto them.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.normalize_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Lowercase policy names so lookups are case-insensitive.
    fn normalize_names(&mut self) -> Result<()> {
        let mut limiters = BTreeMap::new();
        for (name, policy) in std::mem::take(&mut self.limiters) {
            let normalized = name.to_ascii_lowercase();
            if limiters.insert(normalized.clone(), policy).is_some() {
                return Err(TurnstileError::InvalidConfig(format!(
                    "limiter '{}' is defined more than once",
                    normalized
                )));
            }
        }
        self.limiters = limiters;
        Ok(())
    }

    /// Check every policy and service setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(TurnstileError::InvalidConfig(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.limiters.is_empty() {
            return Err(TurnstileError::InvalidConfig(
                "at least one limiter policy is required".to_string(),
            ));
        }
        for (name, policy) in &self.limiters {
            policy.limiter_config().map_err(|e| {
                TurnstileError::InvalidConfig(format!("limiter '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// The sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = TurnstileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.limiters["debate"].key, KeyStrategy::User);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
sweep_interval_ms: 30000
limiters:
  login:
    max_requests: 5
    window_ms: 900000
  comments:
    max_requests: 20
    window_ms: 60000
    key: user
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.limiters.len(), 2);
        assert_eq!(config.limiters["login"].key, KeyStrategy::Ip);
        assert_eq!(config.limiters["comments"].max_requests, 20);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = TurnstileConfig::from_yaml("sweep_interval_ms: 1000").unwrap();
        assert!(config.limiters.contains_key("api"));
        assert_eq!(config.server.listen_addr, default_listen_addr());
    }

    #[test]
    fn test_zero_window_policy_rejected() {
        let yaml = r#"
limiters:
  broken:
    max_requests: 5
    window_ms: 0
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidConfig(msg) if msg.contains("broken")));
    }

    #[test]
    fn test_empty_policy_table_rejected() {
        let err = TurnstileConfig::from_yaml("limiters: {}").unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = TurnstileConfig::from_yaml("limiters: [").unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_policy_names_are_lowercased() {
        let yaml = r#"
limiters:
  Login:
    max_requests: 5
    window_ms: 900000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiters.keys().collect::<Vec<_>>(), vec!["login"]);
    }

    #[test]
    fn test_names_differing_only_in_case_rejected() {
        let yaml = r#"
limiters:
  Login:
    max_requests: 5
    window_ms: 1000
  login:
    max_requests: 6
    window_ms: 1000
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidConfig(msg) if msg.contains("login")));
    }

    fn env_vars(pairs: &[(&str, &str)]) -> Environment {
        let mut vars = ::config::Map::new();
        for (key, value) in pairs {
            vars.insert(key.to_string(), value.to_string());
        }
        environment().source(Some(vars))
    }

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TurnstileConfig::load_layered(None, env_vars(&[])).unwrap();
        assert_eq!(config.sweep_interval_ms, 60_000);
        assert_eq!(config.limiters, default_limiters());
    }

    #[test]
    fn test_env_override_merges_onto_default_policy() {
        let env = env_vars(&[("TURNSTILE__LIMITERS__API__MAX_REQUESTS", "5")]);
        let config = TurnstileConfig::load_layered(None, env).unwrap();

        let api = config.limiters["api"];
        assert_eq!(api.max_requests, 5);
        assert_eq!(api.window_ms, 60_000);
        assert_eq!(api.key, KeyStrategy::Ip);
        assert!(config.limiters.contains_key("debate"));
    }

    #[test]
    fn test_load_from_file() {
        let file = yaml_file(
            r#"
server:
  listen_addr: "0.0.0.0:9100"
limiters:
  Login:
    max_requests: 5
    window_ms: 900000
"#,
        );

        let config = TurnstileConfig::load_layered(Some(file.path()), env_vars(&[])).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9100);
        assert_eq!(config.sweep_interval_ms, 60_000);
        assert_eq!(config.limiters["login"].max_requests, 5);
        // File policies merge onto the built-in ones
        assert!(config.limiters.contains_key("api"));
        assert!(!config.limiters.contains_key("Login"));
    }

    #[test]
    fn test_file_and_yaml_string_agree_on_names() {
        let yaml = r#"
limiters:
  Login:
    max_requests: 5
    window_ms: 900000
"#;
        let file = yaml_file(yaml);

        let loaded = TurnstileConfig::load_layered(Some(file.path()), env_vars(&[])).unwrap();
        let parsed = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(loaded.limiters["login"], parsed.limiters["login"]);
    }

    #[test]
    fn test_env_overrides_file_value() {
        let file = yaml_file(
            r#"
sweep_interval_ms: 30000
limiters:
  login:
    max_requests: 5
    window_ms: 900000
"#,
        );
        let env = env_vars(&[
            ("TURNSTILE__SWEEP_INTERVAL_MS", "1000"),
            ("TURNSTILE__LIMITERS__LOGIN__MAX_REQUESTS", "3"),
        ]);

        let config = TurnstileConfig::load_layered(Some(file.path()), env).unwrap();

        assert_eq!(config.sweep_interval_ms, 1000);
        assert_eq!(config.limiters["login"].max_requests, 3);
        assert_eq!(config.limiters["login"].window_ms, 900_000);
    }

    #[test]
    fn test_invalid_env_override_rejected() {
        let env = env_vars(&[("TURNSTILE__LIMITERS__API__WINDOW_MS", "0")]);
        let err = TurnstileConfig::load_layered(None, env).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidConfig(msg) if msg.contains("api")));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let path = Path::new("/nonexistent/turnstile.yaml");
        let err = TurnstileConfig::load_layered(Some(path), env_vars(&[])).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }
}
