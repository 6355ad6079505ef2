//! Job lifecycle operations.
//!
//! Every function takes the connection (normally an open transaction) it
//! works on and returns a fresh [`Job`] snapshot; nothing here opens its
//! own connection or commits.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::catalog::{self, Command};
use crate::db::{analysis_repo, command_repo, job_repo, DatabaseError};
use crate::error::{LedgerError, Result};
use crate::job::options::{self, JobOptions};
use crate::job::status::{ErrorRecord, JobStatus, Severity};
use crate::job::{matcher, JobId};
use crate::storage::reconciler::{self, ResultEntry};
use crate::storage::Mountpoints;

/// Immutable view of a job as stored at load time.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub datatype: String,
    pub command: Command,
    pub status: JobStatus,
    /// Materialized options, output paths included.
    pub options: JobOptions,
    pub error: Option<ErrorRecord>,
    /// Result files relative to the job results root, sorted.
    pub results: Vec<PathBuf>,
    pub analysis_id: Option<i64>,
}

impl Job {
    pub fn command_name(&self) -> &str {
        &self.command.name
    }

    pub fn script(&self) -> &str {
        &self.command.script
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_mutable(&self, action: &'static str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LedgerError::StatusError {
                job: self.id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }
}

/// What a caller asks to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub datatype: String,
    pub command: String,
    pub options: JobOptions,
    pub analysis_id: i64,
}

impl JobRequest {
    pub fn new(datatype: &str, command: &str, options: JobOptions, analysis_id: i64) -> Self {
        Self {
            datatype: datatype.to_string(),
            command: command.to_string(),
            options,
            analysis_id,
        }
    }
}

/// Loads a job snapshot, failing with `UnknownJob` if the id is absent.
pub fn load(conn: &Connection, mounts: &Mountpoints, id: JobId) -> Result<Job> {
    let row = job_repo::find_by_id(conn, id.0)?.ok_or(LedgerError::UnknownJob(id))?;

    let command_row = command_repo::find_by_id(conn, row.command_id)?.ok_or_else(|| {
        DatabaseError::InvalidRow {
            table: "job",
            reason: format!("job {} references missing command {}", id, row.command_id),
        }
    })?;
    let command = Command::try_from(command_row)?;

    let status = JobStatus::from_id(row.job_status_id).ok_or_else(|| DatabaseError::InvalidRow {
        table: "job",
        reason: format!("unknown status id {}", row.job_status_id),
    })?;

    let stored = JobOptions::from_json(&row.options)?;
    let options = options::materialize(&stored, &command, id, mounts.job_root()?)?;

    let error = match row.log_id {
        Some(log_id) => load_error(conn, log_id)?,
        None => None,
    };

    Ok(Job {
        id,
        datatype: row.data_type,
        command,
        status,
        options,
        error,
        results: reconciler::results_for_job(conn, id)?,
        analysis_id: row.analysis_id,
    })
}

fn load_error(conn: &Connection, log_id: i64) -> Result<Option<ErrorRecord>> {
    let Some(log) = job_repo::find_log(conn, log_id)? else {
        return Ok(None);
    };
    let severity = Severity::from_id(log.severity_id).ok_or_else(|| DatabaseError::InvalidRow {
        table: "logging",
        reason: format!("unknown severity {}", log.severity_id),
    })?;
    let time = DateTime::parse_from_rfc3339(&log.time)
        .map_err(|e| DatabaseError::InvalidRow {
            table: "logging",
            reason: format!("bad timestamp '{}': {}", log.time, e),
        })?
        .with_timezone(&Utc);
    Ok(Some(ErrorRecord {
        severity,
        msg: log.msg,
        time,
    }))
}

/// Creates a job, or returns the equivalent existing one when
/// `return_existing` is set.
pub fn create(
    conn: &Connection,
    mounts: &Mountpoints,
    request: &JobRequest,
    return_existing: bool,
) -> Result<Job> {
    let _span = tracing::info_span!(
        "job.create",
        datatype = %request.datatype,
        command = %request.command,
        analysis = request.analysis_id
    )
    .entered();

    let resolved = catalog::resolve(conn, &request.datatype, &request.command)?;
    if !analysis_repo::exists(conn, request.analysis_id)? {
        return Err(LedgerError::UnknownAnalysis(request.analysis_id));
    }
    mounts.job_root()?;
    let canonical = options::canonical_json(&request.options, &resolved.command)?;
    let stored = options::stored_json(&request.options, &resolved.command)?;

    if let Some(existing) = matcher::find_match(conn, &resolved, &canonical, request.analysis_id)? {
        if return_existing {
            log::info!("Reusing job {} for {} on {}", existing, request.command, request.datatype);
            return load(conn, mounts, existing);
        }
        return Err(LedgerError::DuplicateJob { existing });
    }

    let id = job_repo::insert(
        conn,
        resolved.data_type_id,
        resolved.command_id,
        JobStatus::Queued.id(),
        &stored,
        &canonical,
    )?;
    analysis_repo::link_job(conn, request.analysis_id, id)?;

    if !analysis_repo::sample_composition(conn, request.analysis_id)?.is_empty() {
        let inserted = job_repo::insert_fingerprint(
            conn,
            id,
            request.analysis_id,
            resolved.data_type_id,
            resolved.command_id,
            &canonical,
        );
        if let Err(e) = inserted {
            if !is_constraint_violation(&e) {
                return Err(e.into());
            }
            let owner = job_repo::find_fingerprint_owner(
                conn,
                request.analysis_id,
                resolved.data_type_id,
                resolved.command_id,
                &canonical,
            )?;
            return Err(LedgerError::DuplicateJob {
                existing: JobId(owner.unwrap_or(id)),
            });
        }
    }

    log::info!(
        "Created job {} ({} on {}) for analysis {}",
        id,
        request.command,
        request.datatype,
        request.analysis_id
    );
    load(conn, mounts, JobId(id))
}

pub(crate) fn is_constraint_violation(e: &DatabaseError) -> bool {
    matches!(
        e,
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn set_status(conn: &Connection, mounts: &Mountpoints, id: JobId, status: JobStatus) -> Result<Job> {
    let job = load(conn, mounts, id)?;
    if job.status != status {
        job_repo::update_status(conn, id.0, status.id())?;
        log::info!("Job {} status {} -> {}", id, job.status, status);
    }
    load(conn, mounts, id)
}

/// Attaches a runtime error and moves the job to `error`. A job carries at
/// most one error.
pub fn set_error(conn: &Connection, mounts: &Mountpoints, id: JobId, msg: &str) -> Result<Job> {
    let job = load(conn, mounts, id)?;
    job.ensure_mutable("set error on")?;
    if job.error.is_some() {
        return Err(LedgerError::StatusError {
            job: id,
            status: job.status,
            action: "set error on",
        });
    }

    let time = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    job_repo::attach_log(
        conn,
        id.0,
        JobStatus::Error.id(),
        &time,
        Severity::Runtime.id(),
        msg,
    )?;
    log::warn!("Job {} failed: {}", id, msg);
    load(conn, mounts, id)
}

/// Replaces the job's raw options.
pub fn set_options(
    conn: &Connection,
    mounts: &Mountpoints,
    id: JobId,
    raw: &JobOptions,
) -> Result<Job> {
    let job = load(conn, mounts, id)?;
    job.ensure_mutable("change options of")?;

    let canonical = options::canonical_json(raw, &job.command)?;
    let stored = options::stored_json(raw, &job.command)?;
    if let Err(e) = job_repo::update_options(conn, id.0, &stored, &canonical) {
        if !is_constraint_violation(&e) {
            return Err(e.into());
        }
        let owner = match job.analysis_id {
            Some(analysis_id) => {
                let resolved = catalog::resolve(conn, &job.datatype, job.command_name())?;
                job_repo::find_fingerprint_owner(
                    conn,
                    analysis_id,
                    resolved.data_type_id,
                    resolved.command_id,
                    &canonical,
                )?
            }
            None => None,
        };
        return Err(LedgerError::DuplicateJob {
            existing: owner.map(JobId).unwrap_or(id),
        });
    }
    load(conn, mounts, id)
}

/// Registers result files or directories for a job.
pub fn add_results(
    conn: &Connection,
    mounts: &Mountpoints,
    id: JobId,
    entries: &[ResultEntry],
) -> Result<Job> {
    let _span = tracing::info_span!("job.add_results", job = id.0, entries = entries.len()).entered();

    let job = load(conn, mounts, id)?;
    job.ensure_mutable("add results to")?;

    let ids = reconciler::register_results(conn, mounts, id, entries)?;
    log::info!("Registered {} result file(s) for job {}", ids.len(), id);
    load(conn, mounts, id)
}

/// Removes every row belonging to the job. Returns the files that are no
/// longer referenced by any job; the caller removes them after commit.
pub fn delete(conn: &Connection, mounts: &Mountpoints, id: JobId) -> Result<Vec<PathBuf>> {
    let _span = tracing::info_span!("job.delete", job = id.0).entered();

    let row = job_repo::find_by_id(conn, id.0)?.ok_or(LedgerError::UnknownJob(id))?;
    let released = reconciler::release_job_results(conn, mounts, id)?;
    analysis_repo::unlink_job(conn, id.0)?;
    job_repo::delete(conn, id.0, row.log_id)?;

    log::info!(
        "Deleted job {} ({} file(s) released)",
        id,
        released.len()
    );
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use crate::storage::JOB_MOUNT;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        conn: Connection,
        mounts: Mountpoints,
        analysis_id: i64,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("job");
        std::fs::create_dir_all(&root).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        migrations::run_all(&conn).unwrap();
        let analysis_id = analysis_repo::create(&conn, "a", "", "2026-01-01T00:00:00Z").unwrap();
        analysis_repo::add_samples(&conn, analysis_id, &[(1, "1.SKB8.640193"), (1, "1.SKD8.640184")])
            .unwrap();
        Fixture {
            _temp: temp,
            conn,
            mounts: Mountpoints::new().with_mount(JOB_MOUNT, root),
            analysis_id,
        }
    }

    fn request(f: &Fixture, command: &str) -> JobRequest {
        JobRequest::new(
            "18S",
            command,
            JobOptions::from([("--otu_table_fp", 1i64)]),
            f.analysis_id,
        )
    }

    #[test]
    fn test_create_stores_raw_and_canonical_options() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Alpha Rarefaction"), false).unwrap();
        assert_eq!(job.id, JobId(1));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.datatype, "18S");
        assert_eq!(job.script(), "alpha_rarefaction.py");
        assert_eq!(job.analysis_id, Some(f.analysis_id));

        let (stored, canonical): (String, String) = f
            .conn
            .query_row(
                "SELECT options, canonical_options FROM job WHERE job_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(stored, r#"{"--otu_table_fp":1}"#);
        assert_eq!(
            canonical,
            r#"{"--mapping_fp":null,"--max_rare_depth":null,"--min_rare_depth":null,"--num_steps":null,"--otu_table_fp":1,"--retain_intermediate_files":false,"--tree_fp":null}"#
        );

        let keys: Vec<&str> = job.options.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["--otu_table_fp", "--output_dir"]);
    }

    #[test]
    fn test_set_options_keeps_supplied_keys_only() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Alpha Rarefaction"), false).unwrap();
        let raw = JobOptions::from([("--otu_table_fp", 1i64), ("--num_steps", 10i64)]);
        let updated = set_options(&f.conn, &f.mounts, job.id, &raw).unwrap();

        let keys: Vec<&str> = updated.options.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["--num_steps", "--otu_table_fp", "--output_dir"]);
        let fingerprint: String = f
            .conn
            .query_row("SELECT options FROM job_fingerprint WHERE job_id = ?1", [job.id.0], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(fingerprint, options::canonical_json(&raw, &job.command).unwrap());
    }

    #[test]
    fn test_create_reports_fingerprint_owner() {
        let f = fixture();
        let resolved = catalog::resolve(&f.conn, "18S", "Beta Diversity").unwrap();
        let req = request(&f, "Beta Diversity");
        let canonical = options::canonical_json(&req.options, &resolved.command).unwrap();

        // A job whose canonical text the matcher cannot see, but whose
        // fingerprint already claims this analysis and option set.
        let owner = job_repo::insert(
            &f.conn,
            resolved.data_type_id,
            resolved.command_id,
            JobStatus::Queued.id(),
            "{}",
            "{}",
        )
        .unwrap();
        job_repo::insert_fingerprint(
            &f.conn,
            owner,
            f.analysis_id,
            resolved.data_type_id,
            resolved.command_id,
            &canonical,
        )
        .unwrap();

        assert!(matches!(
            create(&f.conn, &f.mounts, &req, false),
            Err(LedgerError::DuplicateJob { existing }) if existing == JobId(owner)
        ));
    }

    #[test]
    fn test_create_unknown_command() {
        let f = fixture();
        let req = JobRequest::new("ITS", "Summarize Taxa", JobOptions::new(), f.analysis_id);
        assert!(matches!(
            create(&f.conn, &f.mounts, &req, false),
            Err(LedgerError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_create_unknown_analysis() {
        let f = fixture();
        let req = JobRequest::new("18S", "Beta Diversity", JobOptions::new(), 99);
        assert!(matches!(
            create(&f.conn, &f.mounts, &req, false),
            Err(LedgerError::UnknownAnalysis(99))
        ));
    }

    #[test]
    fn test_create_duplicate() {
        let f = fixture();
        let first = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        let second = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false);
        assert!(matches!(
            second,
            Err(LedgerError::DuplicateJob { existing }) if existing == first.id
        ));
        let reused = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), true).unwrap();
        assert_eq!(reused.id, first.id);
    }

    #[test]
    fn test_set_status_any_transition() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        let running = set_status(&f.conn, &f.mounts, job.id, JobStatus::Running).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        let done = set_status(&f.conn, &f.mounts, job.id, JobStatus::Completed).unwrap();
        assert!(done.is_terminal());
    }

    #[test]
    fn test_set_error_once() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        assert!(job.error.is_none());

        let before = Utc::now();
        let failed = set_error(&f.conn, &f.mounts, job.id, "TESTERROR").unwrap();
        let after = Utc::now();
        let error = failed.error.clone().unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(error.severity, Severity::Runtime);
        assert_eq!(error.msg, "TESTERROR");
        assert!(before <= error.time && error.time <= after);

        let again = set_error(&f.conn, &f.mounts, job.id, "SECOND");
        assert!(matches!(again, Err(LedgerError::StatusError { .. })));
        assert_eq!(load(&f.conn, &f.mounts, job.id).unwrap().error, Some(error.clone()));

        // Leaving the error state does not allow a second error record.
        set_status(&f.conn, &f.mounts, job.id, JobStatus::Running).unwrap();
        assert!(set_error(&f.conn, &f.mounts, job.id, "THIRD").is_err());
        assert_eq!(load(&f.conn, &f.mounts, job.id).unwrap().error, Some(error));
    }

    #[test]
    fn test_set_error_on_completed() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        set_status(&f.conn, &f.mounts, job.id, JobStatus::Completed).unwrap();
        assert!(matches!(
            set_error(&f.conn, &f.mounts, job.id, "late"),
            Err(LedgerError::StatusError { status: JobStatus::Completed, .. })
        ));
    }

    #[test]
    fn test_set_options_frozen_when_terminal() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        set_status(&f.conn, &f.mounts, job.id, JobStatus::Error).unwrap();
        let raw = JobOptions::from([("--tree_fp", "tree.tre")]);
        assert!(matches!(
            set_options(&f.conn, &f.mounts, job.id, &raw),
            Err(LedgerError::StatusError { .. })
        ));
    }

    #[test]
    fn test_delete_unknown() {
        let f = fixture();
        assert!(matches!(
            delete(&f.conn, &f.mounts, JobId(42)),
            Err(LedgerError::UnknownJob(JobId(42)))
        ));
    }

    #[test]
    fn test_delete_removes_rows() {
        let f = fixture();
        let job = create(&f.conn, &f.mounts, &request(&f, "Beta Diversity"), false).unwrap();
        set_error(&f.conn, &f.mounts, job.id, "boom").unwrap();

        let released = delete(&f.conn, &f.mounts, job.id).unwrap();
        assert!(released.is_empty());
        assert!(matches!(
            load(&f.conn, &f.mounts, job.id),
            Err(LedgerError::UnknownJob(_))
        ));
        let logs: u32 = f
            .conn
            .query_row("SELECT COUNT(*) FROM logging", [], |r| r.get(0))
            .unwrap();
        assert_eq!(logs, 0);
        let fingerprints: u32 = f
            .conn
            .query_row("SELECT COUNT(*) FROM job_fingerprint", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fingerprints, 0);
    }
}
