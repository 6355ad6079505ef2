//! Jobs: the record of one command invocation for an analysis.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod matcher;
pub mod options;
pub mod record;
pub mod status;

pub use options::{JobOptions, OptionValue};
pub use record::{Job, JobRequest};
pub use status::{ErrorRecord, JobStatus, Severity};

/// Numeric job identifier. Ids are never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        JobId(id)
    }
}
