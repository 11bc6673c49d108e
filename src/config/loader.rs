//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery,
//! environment detection and layering of environment variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::JobExecutorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Base name of the configuration files inside the configuration directory
pub const CONFIG_FILE_STEM: &str = "job-executor";

/// Prefix for environment variable overrides, e.g. `TASKER_JOBS__WORKER_POOL__CORE_POOL_SIZE=8`
pub const ENV_PREFIX: &str = "TASKER_JOBS";

pub struct ConfigManager {
    config: JobExecutorConfig,
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

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading job executor configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = environment,
            core_pool_size = config.worker_pool.core_pool_size,
            max_jobs_per_acquisition = config.acquisition.max_jobs_per_acquisition,
            "⚙️ CONFIG: Job executor configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already constructed configuration, validating it first
    pub fn from_config(config: JobExecutorConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &JobExecutorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Sanitized view of the configuration for logging and the validator binary
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<JobExecutorConfig> {
        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"));
        let env_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        debug!(
            base = %base_file.display(),
            overrides = %env_file.display(),
            "Layering configuration sources"
        );

        let defaults = Config::try_from(&JobExecutorConfig::default())
            .map_err(|e| ConfigurationError::load_error("built-in defaults", e))?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<JobExecutorConfig>()?)
    }

    /// Detect the current environment from the usual variables
    pub fn detect_environment() -> String {
        env::var("TASKER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `TASKER_JOBS_CONFIG_DIR` when set, otherwise `./config`
    pub fn default_config_directory() -> PathBuf {
        env::var("TASKER_JOBS_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn sanitize_config_for_logging(config: &JobExecutorConfig) -> serde_json::Value {
        let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        if let Some(owner) = value
            .get_mut("acquisition")
            .and_then(|acquisition| acquisition.get_mut("lock_owner"))
        {
            if owner.is_string() {
                *owner = serde_json::Value::String("***".to_string());
            }
        }
        value
    }
}
