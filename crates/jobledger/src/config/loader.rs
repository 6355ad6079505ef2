use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::storage::JOB_MOUNT;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "JOBLEDGER_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    log::debug!("Loading config from {}", path.display());
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Config file to use: `explicit`, then `$JOBLEDGER_CONFIG`, then
/// `~/.jobledger/config.json`.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|h| h.join(".jobledger").join("config.json"))
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    config.mountpoints.root(JOB_MOUNT)?;

    for (category, root) in config.mountpoints.iter() {
        if !root.is_absolute() {
            return Err(ConfigError::Validation {
                message: format!(
                    "Mountpoint '{}' must be an absolute path, got '{}'",
                    category,
                    root.display()
                ),
            });
        }
    }

    if let Some(path) = &config.database_path {
        if path.is_dir() {
            return Err(ConfigError::Validation {
                message: format!("database_path '{}' is a directory", path.display()),
            });
        }
    }

    Ok(())
}
