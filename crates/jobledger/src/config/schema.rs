use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::db::default_database_path;
use crate::error::ConfigError;
use crate::storage::Mountpoints;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub mountpoints: Mountpoints,
    /// When false, directories emptied by a job deletion stay on disk.
    #[serde(default = "default_true")]
    pub prune_empty_directories: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Configured database file, or the per-user default.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            }),
        }
    }
}
