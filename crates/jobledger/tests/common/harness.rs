//! Test harness for isolated ledger tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use assert_fs::TempDir;

use jobledger::{Database, JobLedger, Mountpoints, JOB_MOUNT};

/// The samples every harness analysis starts with.
pub const SAMPLES: &[(i64, &str)] = &[
    (1, "1.SKB8.640193"),
    (1, "1.SKD8.640184"),
    (1, "1.SKB7.640196"),
    (1, "1.SKM9.640192"),
    (1, "1.SKM4.640180"),
];

pub struct TestLedger {
    temp_dir: TempDir,
    /// Root of the `job` mount.
    pub job_root: PathBuf,
    pub ledger: JobLedger,
    /// An analysis holding `SAMPLES`.
    pub analysis_id: i64,
}

impl TestLedger {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let job_root = temp_dir.path().join("job");
        std::fs::create_dir_all(&job_root).expect("Failed to create job mount");

        let mounts = Mountpoints::new().with_mount(JOB_MOUNT, &job_root);
        let db = Database::open_in_memory().expect("Failed to open database");
        let ledger = JobLedger::new(db, mounts).expect("Failed to build ledger");

        let analysis_id = ledger
            .create_analysis("harness analysis", "populated with five samples")
            .expect("Failed to create analysis");
        ledger
            .add_samples(analysis_id, SAMPLES)
            .expect("Failed to add samples");

        Self {
            temp_dir,
            job_root,
            ledger,
            analysis_id,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A second analysis with the given samples.
    pub fn analysis_with(&self, samples: &[(i64, &str)]) -> i64 {
        let id = self
            .ledger
            .create_analysis("other analysis", "")
            .expect("Failed to create analysis");
        self.ledger
            .add_samples(id, samples)
            .expect("Failed to add samples");
        id
    }

    /// Writes a file under the job mount and returns its absolute path.
    pub fn write_result(&self, relative: &str, content: &str) -> PathBuf {
        let child = self.temp_dir.child("job").child(relative);
        child.write_str(content).expect("Failed to write result file");
        child.path().to_path_buf()
    }

    /// The layout produced by a typical run:
    /// `1_job_result.txt` plus `2_test_folder/` with two files and a
    /// nested `subdir/subres.html`.
    pub fn populate_results(&self) -> (PathBuf, PathBuf) {
        let file = self.write_result("1_job_result.txt", "job1result.txt");
        self.write_result("2_test_folder/testfile.txt", "DATA");
        self.write_result("2_test_folder/testres.htm", "DATA");
        self.write_result("2_test_folder/subdir/subres.html", "DATA");
        (file, self.job_root.join("2_test_folder"))
    }

    /// Writes a config file pointing at this harness' mount and a database
    /// file inside the temp directory.
    pub fn write_config(&self) -> PathBuf {
        let path = self.temp_dir.path().join("config.json");
        let json = super::ConfigBuilder::new(&self.job_root)
            .database_path(self.temp_dir.path().join("data").join("ledger.db"))
            .build();
        std::fs::write(&path, json).expect("Failed to write config file");
        path
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}
