use std::path::PathBuf;
use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unknown job id: {0}")]
    UnknownJob(JobId),

    #[error("Unknown command '{command}' for datatype '{datatype}'")]
    UnknownCommand { datatype: String, command: String },

    #[error("Unknown datatype: {0}")]
    UnknownDatatype(String),

    #[error("Unknown analysis id: {0}")]
    UnknownAnalysis(i64),

    #[error("An equivalent job already exists: {existing}")]
    DuplicateJob { existing: JobId },

    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Cannot {action} job {job}: status is '{status}'")]
    StatusError {
        job: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Invalid result path '{path}': {reason}")]
    InvalidResultPath { path: PathBuf, reason: String },

    #[error("Invalid command '{name}': {reason}")]
    InvalidCommand { name: String, reason: String },

    #[error("Command '{0}' is already registered")]
    DuplicateCommand(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Database(crate::db::DatabaseError::Sqlite(e))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("No mountpoint configured for file category '{0}'")]
    MissingMount(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove directory '{path}': {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed under '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
