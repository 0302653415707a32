//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate, later sources overriding earlier ones:
//!
//! 1. built-in defaults (`ReliabilityConfig::default()`)
//! 2. `<dir>/reliability.toml` (optional)
//! 3. `<dir>/reliability.<environment>.toml` (optional)
//! 4. `RELIABILITY__SECTION__FIELD` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::ReliabilityConfig;
use crate::constants::env as env_vars;
use ::config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "reliability";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ReliabilityConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Environment variable overrides still apply.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        if let Some(dir) = &config_dir {
            if !dir.is_dir() {
                return Err(ConfigurationError::directory_not_found(
                    dir.display().to_string(),
                ));
            }
        }
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading reliability configuration"
        );

        let config = Self::build_config(&config_directory, environment, true)?;
        config.validate()?;

        info!(
            environment = environment,
            breakers = config.circuit_breakers.component_configs.len(),
            record_groups = config.backup.record_groups.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already constructed configuration (tests, embedded use)
    pub fn from_config(config: ReliabilityConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// JSON rendering of the configuration with sensitive fields masked
    pub fn debug_config(&self) -> ConfigResult<serde_json::Value> {
        let mut value = serde_json::to_value(&self.config)
            .map_err(|e| ConfigurationError::json_serialization_error("debug_config", e))?;
        Self::sanitize_json_recursive(&mut value, &["password", "secret", "token", "credential"]);
        Ok(value)
    }

    fn build_config(
        config_directory: &Path,
        environment: &str,
        with_env_overrides: bool,
    ) -> ConfigResult<ReliabilityConfig> {
        let defaults = serde_json::to_string(&ReliabilityConfig::default())
            .map_err(|e| ConfigurationError::json_serialization_error("defaults", e))?;

        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let mut builder = Config::builder()
            .add_source(File::from_str(&defaults, FileFormat::Json))
            .add_source(File::from(base_file).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_file).format(FileFormat::Toml).required(false));

        if with_env_overrides {
            builder = builder.add_source(
                Environment::with_prefix(env_vars::CONFIG_PREFIX)
                    .separator(env_vars::CONFIG_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let merged = builder.build()?;
        merged
            .try_deserialize::<ReliabilityConfig>()
            .map_err(|e| ConfigurationError::parse_error(config_directory.display().to_string(), e))
    }

    /// Mask string values of fields whose names look sensitive
    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    /// RELIABILITY_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var(env_vars::FALLBACK_ENVIRONMENT))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var(env_vars::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::build_config(dir.path(), "test", false).unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breakers.component_configs.len(), 4);
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("reliability.toml"),
            "[retry]\nmax_attempts = 4\nbase_delay_ms = 250\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("reliability.test.toml"),
            "[retry]\nmax_attempts = 1\n",
        )
        .unwrap();

        let config = ConfigManager::build_config(dir.path(), "test", false).unwrap();
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.base_delay_ms, 250);

        let config = ConfigManager::build_config(dir.path(), "production", false).unwrap();
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_invalid_file_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("reliability.toml"),
            "[retry]\nmax_attempts = \"many\"\n",
        )
        .unwrap();

        let err = ConfigManager::build_config(dir.path(), "test", false).unwrap_err();
        assert!(matches!(err, ConfigurationError::ParseError { .. }));
    }

    #[test]
    fn test_explicit_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = ConfigManager::load_from_directory_with_env(Some(missing), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = ReliabilityConfig::default();
        config.watchdog.check_interval_seconds = 0;
        assert!(ConfigManager::from_config(config, "test").is_err());
    }

    #[test]
    fn test_debug_config_masks_sensitive_fields() {
        let mut value = serde_json::json!({
            "database": { "password": "hunter22", "host": "localhost" },
            "tokens": [{ "api_token": "abc" }]
        });
        ConfigManager::sanitize_json_recursive(&mut value, &["password", "token"]);

        assert_eq!(value["database"]["password"], "[MASKED]");
        assert_eq!(value["database"]["host"], "localhost");
        assert_eq!(value["tokens"], "[MASKED]");
    }
}
