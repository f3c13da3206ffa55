//! Service configuration
//!
//! Loaded from a YAML file merged with `MCSRV_`-prefixed environment
//! overrides (e.g. `MCSRV_PLC__HOST`). The data set, tag, and function
//! tables live here; in a full deployment they are supplied by the external
//! configuration persistence layer.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::core::client::McClientConfig;
use crate::core::polling::{DataSet, Tag};
use crate::core::process::{
    DeployOptions, ProcessFunction, ProcessProgram, DEFAULT_BASE_ADDRESS, DEFAULT_STEP_WORDS,
};
use crate::utils::error::{McSrvError, Result};

/// Controller endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PlcSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5007,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

impl PlcSettings {
    pub fn client_config(&self) -> McClientConfig {
        McClientConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Step-packing defaults for program deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub base_address: u32,
    pub step_words: u16,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            step_words: DEFAULT_STEP_WORDS,
        }
    }
}

impl ProcessSettings {
    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            base_address: Some(self.base_address),
            step_words: Some(self.step_words),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McSrvConfig {
    #[serde(default)]
    pub plc: PlcSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub process: ProcessSettings,
    #[serde(default)]
    pub data_sets: Vec<DataSet>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub functions: Vec<ProcessFunction>,
    #[serde(default)]
    pub programs: Vec<ProcessProgram>,
}

impl McSrvConfig {
    /// Load the YAML file at `path`, then apply `MCSRV_` env overrides
    pub fn load(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MCSRV_").split("__"))
            .extract()
            .map_err(|e| McSrvError::ConfigError(e.to_string()))
    }

    /// Cross-check the configured tables before any connection is made
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for data_set in &self.data_sets {
            data_set.validate()?;
            if !names.insert(data_set.name.as_str()) {
                return Err(McSrvError::ConfigError(format!(
                    "Duplicate data set name '{}'",
                    data_set.name
                )));
            }
            if !ids.insert(data_set.id) {
                return Err(McSrvError::ConfigError(format!(
                    "Duplicate data set id {}",
                    data_set.id
                )));
            }
        }

        let mut keys = HashSet::new();
        for tag in &self.tags {
            let data_set = self
                .data_sets
                .iter()
                .find(|ds| ds.id == tag.data_set_id)
                .ok_or_else(|| {
                    McSrvError::ConfigError(format!(
                        "Tag '{}' references unknown data set {}",
                        tag.key, tag.data_set_id
                    ))
                })?;
            tag.validate_against(data_set)?;
            if !keys.insert(tag.key.as_str()) {
                return Err(McSrvError::ConfigError(format!(
                    "Duplicate tag key '{}'",
                    tag.key
                )));
            }
        }

        let mut function_ids = HashSet::new();
        for function in &self.functions {
            if !function_ids.insert(function.id) {
                return Err(McSrvError::ConfigError(format!(
                    "Duplicate function id {}",
                    function.id
                )));
            }
        }
        for program in &self.programs {
            for step in &program.steps {
                if !function_ids.contains(&step.function_id) {
                    return Err(McSrvError::ConfigError(format!(
                        "Program '{}' step {} references unknown function {}",
                        program.name, step.sequence, step.function_id
                    )));
                }
            }
        }
        if self.process.step_words == 0 {
            return Err(McSrvError::ConfigError(
                "process.step_words must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
