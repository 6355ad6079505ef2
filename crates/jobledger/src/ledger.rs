//! `JobLedger`: the public entry point tying the database, the mount
//! configuration and the job operations together.
//!
//! Every mutating call runs in one immediate transaction. Files on disk are
//! only touched after the transaction that released them has committed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::catalog::{self, Command};
use crate::config::Config;
use crate::db::analysis_repo::{self, SampleComposition};
use crate::db::Database;
use crate::error::{LedgerError, Result};
use crate::job::{matcher, record, Job, JobId, JobOptions, JobRequest, JobStatus};
use crate::storage::reconciler::{self, ResultEntry};
use crate::storage::Mountpoints;

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
    mounts: Mountpoints,
    prune_empty_directories: bool,
}

impl JobLedger {
    /// Fails with `MissingMount` when no `job` mount is configured.
    pub fn new(db: Database, mounts: Mountpoints) -> Result<Self> {
        mounts.job_root()?;
        Ok(Self {
            db,
            mounts,
            prune_empty_directories: true,
        })
    }

    /// Opens the configured database and runs pending migrations.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.database_path()?;
        let db = Database::open(&path)?;
        let mut ledger = Self::new(db, config.mountpoints.clone())?;
        ledger.prune_empty_directories = config.prune_empty_directories;
        Ok(ledger)
    }

    /// Pruning is on by default. Turned off, `delete` removes result files
    /// but leaves their emptied directories behind.
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune_empty_directories = prune;
        self
    }

    pub fn mounts(&self) -> &Mountpoints {
        &self.mounts
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // Catalog

    pub fn get_commands(&self) -> Result<Vec<Command>> {
        self.db.with_conn(catalog::get_commands)
    }

    pub fn get_commands_by_datatype(
        &self,
        datatypes: Option<&[&str]>,
    ) -> Result<BTreeMap<String, Vec<Command>>> {
        self.db
            .with_conn(|conn| catalog::get_commands_by_datatype(conn, datatypes))
    }

    pub fn register_command(&self, command: &Command, datatypes: &[&str]) -> Result<i64> {
        self.db
            .transaction(|tx| catalog::register_command(tx, command, datatypes))
    }

    // Jobs

    /// Creates a job. When an equivalent job exists, returns it if
    /// `return_existing` is set and fails with `DuplicateJob` otherwise.
    pub fn create(&self, request: &JobRequest, return_existing: bool) -> Result<Job> {
        let created = self
            .db
            .transaction(|tx| record::create(tx, &self.mounts, request, return_existing));
        match created {
            // Lost a race on the fingerprint: the other job is committed now.
            Err(LedgerError::DuplicateJob { existing }) if return_existing => self.load(existing),
            other => other,
        }
    }

    pub fn load(&self, id: JobId) -> Result<Job> {
        self.db.with_conn(|conn| record::load(conn, &self.mounts, id))
    }

    /// Id of the lowest equivalent job, if any.
    pub fn find_existing(
        &self,
        datatype: &str,
        command: &str,
        options: &JobOptions,
        analysis_id: i64,
    ) -> Result<Option<JobId>> {
        self.db.with_conn(|conn| {
            matcher::find_existing(conn, datatype, command, options, analysis_id)
        })
    }

    pub fn exists(
        &self,
        datatype: &str,
        command: &str,
        options: &JobOptions,
        analysis_id: i64,
    ) -> Result<bool> {
        self.db
            .with_conn(|conn| matcher::exists(conn, datatype, command, options, analysis_id))
    }

    /// Sets the status by name; unknown names fail with `InvalidStatus`.
    pub fn set_status(&self, id: JobId, status: &str) -> Result<Job> {
        let status: JobStatus = status.parse()?;
        self.db
            .transaction(|tx| record::set_status(tx, &self.mounts, id, status))
    }

    pub fn set_error(&self, id: JobId, msg: &str) -> Result<Job> {
        self.db
            .transaction(|tx| record::set_error(tx, &self.mounts, id, msg))
    }

    pub fn set_options(&self, id: JobId, options: &JobOptions) -> Result<Job> {
        self.db
            .transaction(|tx| record::set_options(tx, &self.mounts, id, options))
    }

    pub fn add_results(&self, id: JobId, entries: &[ResultEntry]) -> Result<Job> {
        self.db
            .transaction(|tx| record::add_results(tx, &self.mounts, id, entries))
    }

    /// Deletes the job and every result file no other job references.
    /// Returns the paths removed from disk; released files that were
    /// already missing are not included.
    pub fn delete(&self, id: JobId) -> Result<Vec<PathBuf>> {
        let released = self
            .db
            .transaction(|tx| record::delete(tx, &self.mounts, id))?;

        let removed = reconciler::remove_physical(
            &self.mounts,
            &released,
            self.prune_empty_directories,
        )?;
        log::debug!(
            "Job {}: removed {} of {} released path(s)",
            id,
            removed.len(),
            released.len()
        );
        Ok(removed)
    }

    pub fn jobs_for_analysis(&self, analysis_id: i64) -> Result<Vec<JobId>> {
        let ids = self
            .db
            .with_conn(|conn| analysis_repo::jobs_for_analysis(conn, analysis_id))
            .map_err(LedgerError::from)?;
        Ok(ids.into_iter().map(JobId).collect())
    }

    // Analyses

    pub fn create_analysis(&self, name: &str, description: &str) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let id = self
            .db
            .transaction(|tx| analysis_repo::create(tx, name, description, &created_at))
            .map_err(LedgerError::from)?;
        log::info!("Created analysis {} ('{}')", id, name);
        Ok(id)
    }

    pub fn add_samples(&self, analysis_id: i64, samples: &[(i64, &str)]) -> Result<()> {
        self.db.transaction(|tx| {
            ensure_analysis(tx, analysis_id)?;
            analysis_repo::add_samples(tx, analysis_id, samples)?;
            Ok(())
        })
    }

    pub fn remove_samples(&self, analysis_id: i64) -> Result<usize> {
        self.db.transaction(|tx| {
            ensure_analysis(tx, analysis_id)?;
            Ok(analysis_repo::remove_samples(tx, analysis_id)?)
        })
    }

    pub fn sample_composition(&self, analysis_id: i64) -> Result<SampleComposition> {
        self.db.with_conn(|conn| {
            ensure_analysis(conn, analysis_id)?;
            Ok(analysis_repo::sample_composition(conn, analysis_id)?)
        })
    }

    // Files

    pub fn resolve_filepath(&self, filepath_id: i64) -> Result<Option<PathBuf>> {
        self.db
            .with_conn(|conn| reconciler::resolve_filepath(conn, &self.mounts, filepath_id))
    }

    pub fn find_filepath(&self, path: &Path) -> Result<Option<i64>> {
        self.db
            .with_conn(|conn| reconciler::find_filepath(conn, &self.mounts, path))
    }
}

fn ensure_analysis(conn: &rusqlite::Connection, analysis_id: i64) -> Result<()> {
    if analysis_repo::exists(conn, analysis_id)? {
        Ok(())
    } else {
        Err(LedgerError::UnknownAnalysis(analysis_id))
    }
}

impl std::fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLedger")
            .field("mounts", &self.mounts)
            .field("prune_empty_directories", &self.prune_empty_directories)
            .finish_non_exhaustive()
    }
}
