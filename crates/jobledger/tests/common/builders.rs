//! Builders for requests and config files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use jobledger::{JobOptions, JobRequest, OptionValue};

/// Builder for `JobRequest` instances.
pub struct RequestBuilder {
    datatype: String,
    command: String,
    options: JobOptions,
    analysis_id: i64,
}

impl RequestBuilder {
    /// "Beta Diversity" on "18S" with no options.
    pub fn new(analysis_id: i64) -> Self {
        Self {
            datatype: "18S".to_string(),
            command: "Beta Diversity".to_string(),
            options: JobOptions::new(),
            analysis_id,
        }
    }

    pub fn datatype(mut self, datatype: &str) -> Self {
        self.datatype = datatype.to_string();
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    pub fn option(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn build(self) -> JobRequest {
        JobRequest::new(&self.datatype, &self.command, self.options, self.analysis_id)
    }
}

/// The request used throughout the duplicate scenarios.
pub fn beta_diversity(analysis_id: i64) -> JobRequest {
    RequestBuilder::new(analysis_id)
        .option("--otu_table_fp", 1i64)
        .option("--mapping_fp", 1i64)
        .build()
}

/// Builder for config JSON text.
pub struct ConfigBuilder {
    job_root: PathBuf,
    database_path: Option<PathBuf>,
    prune_empty_directories: Option<bool>,
}

impl ConfigBuilder {
    pub fn new(job_root: &Path) -> Self {
        Self {
            job_root: job_root.to_path_buf(),
            database_path: None,
            prune_empty_directories: None,
        }
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.database_path = Some(path);
        self
    }

    pub fn prune_empty_directories(mut self, prune: bool) -> Self {
        self.prune_empty_directories = Some(prune);
        self
    }

    pub fn build(self) -> String {
        let mut config = serde_json::json!({
            "version": "1.0",
            "mountpoints": { "job": self.job_root },
        });
        if let Some(path) = self.database_path {
            config["database_path"] = serde_json::json!(path);
        }
        if let Some(prune) = self.prune_empty_directories {
            config["prune_empty_directories"] = serde_json::json!(prune);
        }
        serde_json::to_string_pretty(&config).expect("Failed to serialize config")
    }
}
