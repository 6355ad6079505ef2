pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod ledger;
pub mod storage;

pub use catalog::{Command, ParameterKind};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, LedgerError, Result, StorageError};
pub use job::{ErrorRecord, Job, JobId, JobOptions, JobRequest, JobStatus, OptionValue, Severity};
pub use ledger::JobLedger;
pub use storage::{Mountpoints, ResultEntry, ResultKind, JOB_MOUNT};
