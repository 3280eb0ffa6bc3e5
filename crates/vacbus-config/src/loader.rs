// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse into [`VacbusConfig`]
//! 4. Apply `VACBUS_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! VACBUS_BUS_FAILURE_THRESHOLD=5
//! VACBUS_BUS_RECONNECT_BACKOFF_MS=1000
//! VACBUS_PRIORITY_QUERY_LOCK_BUDGET_MS=80
//! VACBUS_DETECTION_ENABLED=false
//! VACBUS_DETECTION_PROBE_TIMEOUT_MS=300
//! VACBUS_DETECTION_EXCLUDE_PORTS=COM1,COM2
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::VacbusConfig;

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "VACBUS";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// ```no_run
/// use vacbus_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("vacbus.yaml").unwrap();
/// println!("{} static bindings", config.devices.len());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `VACBUS` prefix and env resolution enabled.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides from the environment.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<VacbusConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let config = self.load_from_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        debug!(
            devices = config.devices.len(),
            detection = config.detection.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<VacbusConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config = parse_str(&content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn var(&self, key: &str) -> (String, Option<String>) {
        let name = format!("{}_{}", self.env_prefix, key);
        let value = env::var(&name).ok();
        (name, value)
    }

    fn apply_env_overrides(&self, config: &mut VacbusConfig) -> ConfigResult<()> {
        if let (name, Some(value)) = self.var("BUS_FAILURE_THRESHOLD") {
            config.bus.failure_threshold = parse_env(&name, &value)?;
        }
        if let (name, Some(value)) = self.var("BUS_RECONNECT_BACKOFF_MS") {
            config.bus.reconnect_backoff = Duration::from_millis(parse_env(&name, &value)?);
        }
        if let (name, Some(value)) = self.var("PRIORITY_QUERY_LOCK_BUDGET_MS") {
            config.priority.query_lock_budget = Duration::from_millis(parse_env(&name, &value)?);
        }
        if let (_, Some(value)) = self.var("DETECTION_ENABLED") {
            config.detection.enabled = parse_bool(&value);
        }
        if let (name, Some(value)) = self.var("DETECTION_PROBE_TIMEOUT_MS") {
            config.detection.options.probe_timeout =
                Duration::from_millis(parse_env(&name, &value)?);
        }
        if let (_, Some(value)) = self.var("DETECTION_EXCLUDE_PORTS") {
            config.detection.options.exclude_ports = value
                .split(',')
                .map(str::trim)
                .filter(|port| !port.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<VacbusConfig> {
    if content.trim().is_empty() {
        return Ok(VacbusConfig::default());
    }

    match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// Replaces `${VAR}` and `${VAR:default}` with environment values.
///
/// Unknown variables without a default are left untouched.
fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let inner = &after[..end];
        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = %name, "Environment variable not found");
                result.push_str(&rest[start..start + 3 + end]);
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_env_var(name, format!("cannot parse '{value}'")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with the default loader.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<VacbusConfig> {
    ConfigLoader::new().load(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use vacbus_core::Parity;

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("VACBUS_LOADER_TEST")
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            r#"
bus:
  failure_threshold: 5
  reconnect_backoff: 1s
priority:
  query_lock_budget: 80ms
detection:
  probe_timeout: 300ms
  exclude_ports: [COM1]
devices:
  DryPump:
    port: COM5
    baud_rate: 38400
    parity: even
    expected_response_length: 7
    timeout: 200ms
"#,
        );

        let config = loader().load(file.path()).unwrap();
        assert_eq!(config.bus.failure_threshold, 5);
        assert_eq!(config.bus.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(config.bus.dequeue_poll, Duration::from_millis(50));
        assert_eq!(config.priority.query_lock_budget, Duration::from_millis(80));
        assert!(config.detection.enabled);
        assert_eq!(config.detection.options.probe_timeout, Duration::from_millis(300));
        assert_eq!(config.detection.options.exclude_ports, vec!["COM1".to_string()]);

        let dry = config.device("DryPump").unwrap();
        assert_eq!(dry.port, "COM5");
        assert_eq!(dry.parity, Parity::Even);
        assert_eq!(dry.timeout, Duration::from_millis(200));
        assert_eq!(dry.settings("DryPump").unwrap().to_string(), "38400 8E1");
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
[detection]
enabled = false

[devices.TemperatureController]
port = "/dev/ttyUSB1"
baud_rate = 19200
"#,
        );

        let config = loader().load(file.path()).unwrap();
        assert!(!config.detection.enabled);
        assert_eq!(config.devices["TemperatureController"].port, "/dev/ttyUSB1");
        assert_eq!(config.devices["TemperatureController"].parity, Parity::None);
    }

    #[test]
    fn test_load_json() {
        let file = write_config(".json", r#"{"bus": {"join_timeout": "1s"}}"#);
        let config = loader().load(file.path()).unwrap();
        assert_eq!(config.bus.join_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_file_is_valid() {
        for suffix in [".yaml", ".toml", ".json"] {
            let file = write_config(suffix, "");
            let config = loader().load(file.path()).unwrap();
            assert_eq!(config, VacbusConfig::default());
        }
    }

    #[test]
    fn test_validation_runs_on_load() {
        let file = write_config(
            ".yaml",
            "devices:\n  A:\n    port: COM5\n  B:\n    port: COM5\n",
        );
        let err = loader().load(file.path()).unwrap_err();
        assert_eq!(err.error_type(), "duplicate_port");
    }

    #[test]
    fn test_parse_error_carries_path() {
        let file = write_config(".yaml", "bus: [not, a, map]");
        let err = loader().load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = loader().load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let resolved = resolve_env_placeholders("port: ${VACBUS_TEST_UNSET_PORT:COM7}");
        assert_eq!(resolved, "port: COM7");

        let untouched = resolve_env_placeholders("port: ${VACBUS_TEST_UNSET_PORT}");
        assert_eq!(untouched, "port: ${VACBUS_TEST_UNSET_PORT}");

        let unterminated = resolve_env_placeholders("port: ${OPEN");
        assert_eq!(unterminated, "port: ${OPEN");
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("VACBUS_OVERRIDE_TEST_BUS_FAILURE_THRESHOLD", "7");
        env::set_var("VACBUS_OVERRIDE_TEST_DETECTION_EXCLUDE_PORTS", "COM1, COM2");

        let config = ConfigLoader::new()
            .with_env_prefix("VACBUS_OVERRIDE_TEST")
            .load_from_str("", ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.bus.failure_threshold, 7);
        assert_eq!(
            config.detection.options.exclude_ports,
            vec!["COM1".to_string(), "COM2".to_string()]
        );

        env::set_var("VACBUS_BAD_TEST_BUS_FAILURE_THRESHOLD", "many");
        let err = ConfigLoader::new()
            .with_env_prefix("VACBUS_BAD_TEST")
            .load_from_str("", ConfigFormat::Yaml)
            .unwrap_err();
        assert_eq!(err.error_type(), "invalid_env_var");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("ON"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("no"));
    }
}
