//! Filepath repository: `filepath` rows and the `job_results_filepath`
//! links between jobs and the files they produced.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A stored file reference. `filepath` is relative to the mount root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilepathRow {
    pub filepath_id: i64,
    pub mount: String,
    pub filepath: String,
    pub filepath_type: String,
}

impl FilepathRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            filepath_id: row.get("filepath_id")?,
            mount: row.get("mount")?,
            filepath: row.get("filepath")?,
            filepath_type: row.get("filepath_type")?,
        })
    }
}

/// Inserts a filepath row, or returns the id of the existing row for the
/// same `(mount, filepath)`.
pub fn upsert(
    conn: &Connection,
    mount: &str,
    filepath: &str,
    filepath_type: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO filepath (mount, filepath, filepath_type) VALUES (?1, ?2, ?3)",
        params![mount, filepath, filepath_type],
    )?;
    let id = conn.query_row(
        "SELECT filepath_id FROM filepath WHERE mount = ?1 AND filepath = ?2",
        params![mount, filepath],
        |r| r.get(0),
    )?;
    Ok(id)
}

pub fn find_by_id(conn: &Connection, filepath_id: i64) -> Result<Option<FilepathRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM filepath WHERE filepath_id = ?1",
            params![filepath_id],
            FilepathRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_path(
    conn: &Connection,
    mount: &str,
    filepath: &str,
) -> Result<Option<FilepathRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM filepath WHERE mount = ?1 AND filepath = ?2",
            params![mount, filepath],
            FilepathRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Links a filepath to a job's results. Re-linking is a no-op.
pub fn link_result(conn: &Connection, job_id: i64, filepath_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO job_results_filepath (job_id, filepath_id) VALUES (?1, ?2)",
        params![job_id, filepath_id],
    )?;
    Ok(())
}

/// All result rows of a job, by filepath id.
pub fn results_for_job(conn: &Connection, job_id: i64) -> Result<Vec<FilepathRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT f.* FROM filepath f
         JOIN job_results_filepath jr ON jr.filepath_id = f.filepath_id
         WHERE jr.job_id = ?1
         ORDER BY f.filepath_id",
    )?;
    let rows = stmt
        .query_map(params![job_id], FilepathRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Removes every result link of a job, returning how many were removed.
pub fn unlink_results(conn: &Connection, job_id: i64) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM job_results_filepath WHERE job_id = ?1",
        params![job_id],
    )?;
    Ok(removed)
}

/// Number of jobs still linked to a filepath.
pub fn reference_count(conn: &Connection, filepath_id: i64) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM job_results_filepath WHERE filepath_id = ?1",
        params![filepath_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn delete(conn: &Connection, filepath_id: i64) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM filepath WHERE filepath_id = ?1",
        params![filepath_id],
    )?;
    Ok(removed)
}
