//! Duplicate detection: does a job equivalent to the requested one already
//! exist?
//!
//! Two jobs are equivalent when they run the same command on the same
//! datatype with the same canonical options, and belong to analyses with
//! the same sample composition. An analysis without samples never matches.

use rusqlite::Connection;

use crate::catalog::{self, ResolvedCommand};
use crate::db::{analysis_repo, job_repo};
use crate::error::Result;
use crate::job::options::{self, JobOptions};
use crate::job::JobId;

/// Lowest-id job equivalent to the request, if any.
pub fn find_existing(
    conn: &Connection,
    datatype: &str,
    command_name: &str,
    options: &JobOptions,
    analysis_id: i64,
) -> Result<Option<JobId>> {
    let Some(resolved) = catalog::try_resolve(conn, datatype, command_name)? else {
        log::debug!(
            "No command '{}' for datatype '{}'; nothing to match",
            command_name,
            datatype
        );
        return Ok(None);
    };
    let canonical = options::canonical_json(options, &resolved.command)?;
    find_match(conn, &resolved, &canonical, analysis_id)
}

/// Whether an equivalent job exists.
pub fn exists(
    conn: &Connection,
    datatype: &str,
    command_name: &str,
    options: &JobOptions,
    analysis_id: i64,
) -> Result<bool> {
    Ok(find_existing(conn, datatype, command_name, options, analysis_id)?.is_some())
}

/// Matching against an already resolved command and canonical options.
pub(crate) fn find_match(
    conn: &Connection,
    resolved: &ResolvedCommand,
    canonical: &str,
    analysis_id: i64,
) -> Result<Option<JobId>> {
    let composition = analysis_repo::sample_composition(conn, analysis_id)?;
    if composition.is_empty() {
        log::debug!("Analysis {} has no samples; skipping duplicate check", analysis_id);
        return Ok(None);
    }

    let candidates =
        job_repo::find_by_signature(conn, resolved.data_type_id, resolved.command_id, canonical)?;
    for job_id in candidates {
        for linked in analysis_repo::analyses_for_job(conn, job_id)? {
            if linked == analysis_id
                || analysis_repo::sample_composition(conn, linked)? == composition
            {
                log::debug!(
                    "Job {} (analysis {}) matches request on analysis {}",
                    job_id,
                    linked,
                    analysis_id
                );
                return Ok(Some(JobId(job_id)));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    const SAMPLES: &[(i64, &str)] = &[
        (1, "1.SKB8.640193"),
        (1, "1.SKD8.640184"),
        (1, "1.SKB7.640196"),
        (1, "1.SKM9.640192"),
        (1, "1.SKM4.640180"),
    ];

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        migrations::run_all(&conn).unwrap();
        conn
    }

    fn analysis(conn: &Connection, samples: &[(i64, &str)]) -> i64 {
        let id = analysis_repo::create(conn, "analysis", "", "2026-01-01T00:00:00Z").unwrap();
        analysis_repo::add_samples(conn, id, samples).unwrap();
        id
    }

    fn beta_options(mapping: i64) -> JobOptions {
        JobOptions::from([("--otu_table_fp", 1i64), ("--mapping_fp", mapping)])
    }

    /// Inserts a Beta Diversity job on 18S linked to `analysis_id`.
    fn stored_job(conn: &Connection, analysis_id: i64, options: &JobOptions) -> i64 {
        let resolved = catalog::resolve(conn, "18S", "Beta Diversity").unwrap();
        let canonical = options::canonical_json(options, &resolved.command).unwrap();
        let stored = options.to_json().unwrap();
        let id = job_repo::insert(
            conn,
            resolved.data_type_id,
            resolved.command_id,
            1,
            &stored,
            &canonical,
        )
        .unwrap();
        analysis_repo::link_job(conn, analysis_id, id).unwrap();
        id
    }

    #[test]
    fn test_exists_same_composition_other_analysis() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        let job = stored_job(&conn, owner, &beta_options(1));
        let requester = analysis(&conn, SAMPLES);

        assert!(exists(&conn, "18S", "Beta Diversity", &beta_options(1), requester).unwrap());
        assert_eq!(
            find_existing(&conn, "18S", "Beta Diversity", &beta_options(1), requester).unwrap(),
            Some(JobId(job))
        );
    }

    #[test]
    fn test_no_match_on_different_options() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        stored_job(&conn, owner, &beta_options(1));

        assert!(!exists(&conn, "18S", "Beta Diversity", &beta_options(27), owner).unwrap());
    }

    #[test]
    fn test_no_match_on_different_datatype() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        stored_job(&conn, owner, &beta_options(1));

        assert_eq!(
            find_existing(&conn, "16S", "Beta Diversity", &beta_options(1), owner).unwrap(),
            None
        );
    }

    #[test]
    fn test_no_match_on_disjoint_samples() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        stored_job(&conn, owner, &beta_options(1));
        let other = analysis(&conn, &[(1, "1.SKB1.640202")]);

        assert!(!exists(&conn, "18S", "Beta Diversity", &beta_options(1), other).unwrap());
    }

    #[test]
    fn test_no_match_on_overlapping_samples() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        stored_job(&conn, owner, &beta_options(1));
        let subset = analysis(&conn, &SAMPLES[..3]);

        assert!(!exists(&conn, "18S", "Beta Diversity", &beta_options(1), subset).unwrap());
    }

    #[test]
    fn test_no_samples_is_not_an_error() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        stored_job(&conn, owner, &beta_options(1));
        let empty = analysis(&conn, &[]);

        assert_eq!(
            find_existing(&conn, "18S", "Beta Diversity", &beta_options(1), empty).unwrap(),
            None
        );
    }

    #[test]
    fn test_lowest_id_wins() {
        let conn = test_conn();
        let first_owner = analysis(&conn, SAMPLES);
        let second_owner = analysis(&conn, SAMPLES);
        let first = stored_job(&conn, first_owner, &beta_options(1));
        stored_job(&conn, second_owner, &beta_options(1));

        assert_eq!(
            find_existing(&conn, "18S", "Beta Diversity", &beta_options(1), second_owner).unwrap(),
            Some(JobId(first))
        );
    }

    #[test]
    fn test_unknown_command_matches_nothing() {
        let conn = test_conn();
        let owner = analysis(&conn, SAMPLES);
        assert!(!exists(&conn, "ITS", "Summarize Taxa", &JobOptions::new(), owner).unwrap());
    }
}
