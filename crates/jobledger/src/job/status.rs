use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    /// Primary key of the status in the `job_status` table.
    pub fn id(self) -> i64 {
        match self {
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Completed => 3,
            JobStatus::Error => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(JobStatus::Queued),
            2 => Some(JobStatus::Running),
            3 => Some(JobStatus::Completed),
            4 => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Terminal jobs have frozen options and results.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// Severity of a logged job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Runtime,
    Fatal,
}

impl Severity {
    pub fn id(self) -> i64 {
        match self {
            Severity::Warning => 1,
            Severity::Runtime => 2,
            Severity::Fatal => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Severity::Warning),
            2 => Some(Severity::Runtime),
            3 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

/// The error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub severity: Severity,
    pub msg: String,
    pub time: DateTime<Utc>,
}
