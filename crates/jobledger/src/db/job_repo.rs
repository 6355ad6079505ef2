//! Job repository: row-level operations for `job`, `logging` and
//! `job_fingerprint`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row joined with its datatype name and analysis link.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: i64,
    pub data_type_id: i64,
    pub data_type: String,
    pub command_id: i64,
    pub job_status_id: i64,
    pub options: String,
    pub log_id: Option<i64>,
    pub analysis_id: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            data_type_id: row.get("data_type_id")?,
            data_type: row.get("data_type")?,
            command_id: row.get("command_id")?,
            job_status_id: row.get("job_status_id")?,
            options: row.get("options")?,
            log_id: row.get("log_id")?,
            analysis_id: row.get("analysis_id")?,
        })
    }
}

/// A raw `logging` row.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub log_id: i64,
    pub time: String,
    pub severity_id: i64,
    pub msg: String,
}

/// Inserts a new job row and returns its id. `options` is the caller's
/// option set as given, `canonical_options` the form compared by the
/// matcher.
pub fn insert(
    conn: &Connection,
    data_type_id: i64,
    command_id: i64,
    job_status_id: i64,
    options: &str,
    canonical_options: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO job (data_type_id, job_status_id, command_id, options, canonical_options)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![data_type_id, job_status_id, command_id, options, canonical_options],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a job by its id.
pub fn find_by_id(conn: &Connection, job_id: i64) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT j.job_id, j.data_type_id, d.data_type, j.command_id, j.job_status_id,
                    j.options, j.log_id, aj.analysis_id
             FROM job j
             JOIN data_type d ON d.data_type_id = j.data_type_id
             LEFT JOIN analysis_job aj ON aj.job_id = j.job_id
             WHERE j.job_id = ?1",
            params![job_id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Ids of jobs with exactly this datatype, command and canonical options,
/// ascending.
pub fn find_by_signature(
    conn: &Connection,
    data_type_id: i64,
    command_id: i64,
    canonical_options: &str,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id FROM job
         WHERE data_type_id = ?1 AND command_id = ?2 AND canonical_options = ?3
         ORDER BY job_id",
    )?;
    let ids = stmt
        .query_map(params![data_type_id, command_id, canonical_options], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn update_status(conn: &Connection, job_id: i64, job_status_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE job SET job_status_id = ?2 WHERE job_id = ?1",
        params![job_id, job_status_id],
    )?;
    Ok(())
}

/// Replaces both option columns and keeps the fingerprint in step.
pub fn update_options(
    conn: &Connection,
    job_id: i64,
    options: &str,
    canonical_options: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE job SET options = ?2, canonical_options = ?3 WHERE job_id = ?1",
        params![job_id, options, canonical_options],
    )?;
    conn.execute(
        "UPDATE job_fingerprint SET options = ?2 WHERE job_id = ?1",
        params![job_id, canonical_options],
    )?;
    Ok(())
}

/// Inserts a log entry and attaches it to the job, setting its status.
pub fn attach_log(
    conn: &Connection,
    job_id: i64,
    job_status_id: i64,
    time: &str,
    severity_id: i64,
    msg: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO logging (time, severity_id, msg) VALUES (?1, ?2, ?3)",
        params![time, severity_id, msg],
    )?;
    let log_id = conn.last_insert_rowid();
    conn.execute(
        "UPDATE job SET log_id = ?2, job_status_id = ?3 WHERE job_id = ?1",
        params![job_id, log_id, job_status_id],
    )?;
    Ok(log_id)
}

pub fn find_log(conn: &Connection, log_id: i64) -> Result<Option<LogRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT log_id, time, severity_id, msg FROM logging WHERE log_id = ?1",
            params![log_id],
            |r| {
                Ok(LogRow {
                    log_id: r.get(0)?,
                    time: r.get(1)?,
                    severity_id: r.get(2)?,
                    msg: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Records the dedup key of a freshly created job.
pub fn insert_fingerprint(
    conn: &Connection,
    job_id: i64,
    analysis_id: i64,
    data_type_id: i64,
    command_id: i64,
    options: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_fingerprint (job_id, analysis_id, data_type_id, command_id, options)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, analysis_id, data_type_id, command_id, options],
    )?;
    Ok(())
}

/// Returns the job holding a dedup key, if any.
pub fn find_fingerprint_owner(
    conn: &Connection,
    analysis_id: i64,
    data_type_id: i64,
    command_id: i64,
    options: &str,
) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT job_id FROM job_fingerprint
             WHERE analysis_id = ?1 AND data_type_id = ?2 AND command_id = ?3 AND options = ?4",
            params![analysis_id, data_type_id, command_id, options],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Deletes the job row together with its fingerprint and log entry.
/// Links to analyses and results must already be gone.
pub fn delete(conn: &Connection, job_id: i64, log_id: Option<i64>) -> Result<usize, DatabaseError> {
    conn.execute("DELETE FROM job_fingerprint WHERE job_id = ?1", params![job_id])?;
    let removed = conn.execute("DELETE FROM job WHERE job_id = ?1", params![job_id])?;
    if let Some(log_id) = log_id {
        conn.execute("DELETE FROM logging WHERE log_id = ?1", params![log_id])?;
    }
    Ok(removed)
}
