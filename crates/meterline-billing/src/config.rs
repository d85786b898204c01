use crate::domain::proration::{ProrationBehavior, ProrationDefaults, ProrationStrategy};
use crate::error::{BillingError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use meterline_common::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "meterline.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    pub service: ServiceConfig,
    pub processing: ProcessingConfig,
    pub proration: ProrationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_id: String,
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: "meterline-billing".to_string(),
            environment: "development".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Upper bound on events processed at the same time
    pub max_concurrency: usize,
    /// Events read per batch by the replay command
    pub batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            batch_size: 500,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProrationConfig {
    pub default_strategy: ProrationStrategy,
    pub default_behavior: ProrationBehavior,
}

impl ProrationConfig {
    pub fn defaults(&self) -> ProrationDefaults {
        ProrationDefaults {
            strategy: self.default_strategy,
            behavior: self.default_behavior,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "meterline_billing=info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl BillingConfig {
    /// Defaults, then the TOML file, then `METERLINE_` environment variables
    /// (`METERLINE_PROCESSING__MAX_CONCURRENCY=8`).
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BillingConfig::default()));

        match path_override {
            Some(path) => {
                if !path.exists() {
                    return Err(BillingError::ConfigError(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(Env::prefixed("METERLINE_").split("__"));

        let config: BillingConfig = figment
            .extract()
            .map_err(|e| BillingError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.max_concurrency == 0 {
            return Err(BillingError::ConfigError(
                "processing.max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.processing.batch_size == 0 {
            return Err(BillingError::ConfigError(
                "processing.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(BillingError::ConfigError(
                "logging.filter cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
