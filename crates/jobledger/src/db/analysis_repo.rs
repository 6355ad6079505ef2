//! Analysis repository. Analyses are owned elsewhere; this crate only needs
//! their identity, their sample composition and the job links.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};

use super::DatabaseError;

/// The `(processed_data_id, sample_id)` pairs an analysis draws from.
pub type SampleComposition = BTreeSet<(i64, String)>;

/// Inserts an analysis and returns its id.
pub fn create(
    conn: &Connection,
    name: &str,
    description: &str,
    created_at: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO analysis (name, description, created_at) VALUES (?1, ?2, ?3)",
        params![name, description, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn exists(conn: &Connection, analysis_id: i64) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM analysis WHERE analysis_id = ?1",
        params![analysis_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Adds samples to an analysis. Pairs already present are ignored.
pub fn add_samples(
    conn: &Connection,
    analysis_id: i64,
    samples: &[(i64, &str)],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO analysis_sample (analysis_id, processed_data_id, sample_id)
         VALUES (?1, ?2, ?3)",
    )?;
    for (processed_data_id, sample_id) in samples {
        stmt.execute(params![analysis_id, processed_data_id, sample_id])?;
    }
    Ok(())
}

/// Removes every sample from an analysis, returning how many were removed.
pub fn remove_samples(conn: &Connection, analysis_id: i64) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM analysis_sample WHERE analysis_id = ?1",
        params![analysis_id],
    )?;
    Ok(removed)
}

pub fn sample_composition(
    conn: &Connection,
    analysis_id: i64,
) -> Result<SampleComposition, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT processed_data_id, sample_id FROM analysis_sample WHERE analysis_id = ?1",
    )?;
    let composition = stmt
        .query_map(params![analysis_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<SampleComposition, _>>()?;
    Ok(composition)
}

pub fn link_job(conn: &Connection, analysis_id: i64, job_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO analysis_job (analysis_id, job_id) VALUES (?1, ?2)",
        params![analysis_id, job_id],
    )?;
    Ok(())
}

pub fn unlink_job(conn: &Connection, job_id: i64) -> Result<usize, DatabaseError> {
    let removed = conn.execute("DELETE FROM analysis_job WHERE job_id = ?1", params![job_id])?;
    Ok(removed)
}

/// Analyses a job is linked to, ascending.
pub fn analyses_for_job(conn: &Connection, job_id: i64) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT analysis_id FROM analysis_job WHERE job_id = ?1 ORDER BY analysis_id",
    )?;
    let ids = stmt
        .query_map(params![job_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Jobs linked to an analysis, ascending.
pub fn jobs_for_analysis(conn: &Connection, analysis_id: i64) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id FROM analysis_job WHERE analysis_id = ?1 ORDER BY job_id",
    )?;
    let ids = stmt
        .query_map(params![analysis_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
