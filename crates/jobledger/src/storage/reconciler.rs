//! Reconciles `filepath` rows with the files they point at.
//!
//! Database rows are always removed before the files (see
//! [`release_job_results`] and [`remove_physical`]): a crash in between
//! leaves an orphaned file, never a row pointing at nothing.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::Connection;
use walkdir::WalkDir;

use crate::db::filepath_repo;
use crate::error::{LedgerError, Result, StorageError};
use crate::job::JobId;
use crate::storage::mounts::{to_stored, Mountpoints, JOB_MOUNT};

/// How a result path is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// A single regular file.
    File,
    /// Every regular file beneath the directory, at any depth.
    Directory,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::File => "file",
            ResultKind::Directory => "directory",
        }
    }
}

impl FromStr for ResultKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(ResultKind::File),
            "directory" => Ok(ResultKind::Directory),
            other => Err(format!("unknown result kind '{}'", other)),
        }
    }
}

/// A path reported by a worker, absolute or relative to the job mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    pub path: PathBuf,
    pub kind: ResultKind,
}

impl ResultEntry {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            kind: ResultKind::File,
        }
    }

    pub fn directory<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            kind: ResultKind::Directory,
        }
    }
}

/// Lazily lists the regular files beneath `dir` in lexicographic
/// (component-wise) order, relative to `base`. Symlinks and directory
/// nodes are skipped.
pub fn flatten_directory(
    dir: &Path,
    base: &Path,
) -> impl Iterator<Item = std::result::Result<PathBuf, StorageError>> {
    let dir = dir.to_path_buf();
    let base = base.to_path_buf();
    WalkDir::new(&dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let path = entry.path();
                Some(Ok(path.strip_prefix(&base).unwrap_or(path).to_path_buf()))
            }
            Ok(_) => None,
            Err(source) => Some(Err(StorageError::Walk {
                path: dir.clone(),
                source,
            })),
        })
}

/// Registers result files for a job. Every entry is checked before any
/// row is written.
pub fn register_results(
    conn: &Connection,
    mounts: &Mountpoints,
    job_id: JobId,
    entries: &[ResultEntry],
) -> Result<Vec<i64>> {
    let root = mounts.job_root()?;

    let mut files: Vec<(String, ResultKind)> = Vec::new();
    for entry in entries {
        let absolute = if entry.path.is_absolute() {
            entry.path.clone()
        } else {
            root.join(&entry.path)
        };
        let invalid = |reason: String| LedgerError::InvalidResultPath {
            path: entry.path.clone(),
            reason,
        };

        let relative = mounts
            .relativize(JOB_MOUNT, &absolute)
            .ok_or_else(|| invalid(format!("not inside {}", root.display())))?;
        let metadata = fs::symlink_metadata(&absolute).map_err(|e| invalid(e.to_string()))?;

        match entry.kind {
            ResultKind::File => {
                if !metadata.is_file() {
                    return Err(invalid("not a regular file".to_string()));
                }
                files.push((to_stored(&relative), ResultKind::File));
            }
            ResultKind::Directory => {
                if !metadata.is_dir() {
                    return Err(invalid("not a directory".to_string()));
                }
                for file in flatten_directory(&absolute, root) {
                    files.push((to_stored(&file?), ResultKind::Directory));
                }
            }
        }
    }

    let mut ids = Vec::with_capacity(files.len());
    for (filepath, kind) in files {
        let id = filepath_repo::upsert(conn, JOB_MOUNT, &filepath, kind.as_str())?;
        filepath_repo::link_result(conn, job_id.0, id)?;
        ids.push(id);
    }
    Ok(ids)
}

/// A job's result paths relative to the job mount, sorted.
pub fn results_for_job(conn: &Connection, job_id: JobId) -> Result<Vec<PathBuf>> {
    let mut results: Vec<PathBuf> = filepath_repo::results_for_job(conn, job_id.0)?
        .into_iter()
        .filter(|row| row.mount == JOB_MOUNT)
        .map(|row| PathBuf::from(row.filepath))
        .collect();
    results.sort();
    Ok(results)
}

/// Absolute path of a stored filepath.
pub fn resolve_filepath(
    conn: &Connection,
    mounts: &Mountpoints,
    filepath_id: i64,
) -> Result<Option<PathBuf>> {
    match filepath_repo::find_by_id(conn, filepath_id)? {
        Some(row) => Ok(Some(mounts.resolve(&row.mount, &row.filepath)?)),
        None => Ok(None),
    }
}

/// Filepath id of a physical path, if it is registered.
pub fn find_filepath(conn: &Connection, mounts: &Mountpoints, path: &Path) -> Result<Option<i64>> {
    for (category, _) in mounts.iter() {
        if let Some(relative) = mounts.relativize(category, path) {
            if let Some(row) = filepath_repo::find_by_path(conn, category, &to_stored(&relative))? {
                return Ok(Some(row.filepath_id));
            }
        }
    }
    Ok(None)
}

/// Drops a job's result links and every filepath row no other job still
/// references. Returns the absolute paths of the dropped rows so the caller
/// can remove them once the transaction has committed.
pub fn release_job_results(
    conn: &Connection,
    mounts: &Mountpoints,
    job_id: JobId,
) -> Result<Vec<PathBuf>> {
    let rows = filepath_repo::results_for_job(conn, job_id.0)?;
    filepath_repo::unlink_results(conn, job_id.0)?;

    let mut released = Vec::new();
    for row in rows {
        if filepath_repo::reference_count(conn, row.filepath_id)? > 0 {
            continue;
        }
        filepath_repo::delete(conn, row.filepath_id)?;
        match mounts.resolve(&row.mount, &row.filepath) {
            Ok(path) => released.push(path),
            Err(e) => log::warn!(
                "Dropped filepath {} ({}) without removing it from disk: {}",
                row.filepath_id,
                row.filepath,
                e
            ),
        }
    }
    Ok(released)
}

/// Removes files and directories from disk. Paths that are already gone
/// are logged and skipped. With `prune`, directories emptied by the
/// removal are deleted up to (not including) their mount root. Returns the
/// paths actually removed.
pub fn remove_physical(
    mounts: &Mountpoints,
    paths: &[PathBuf],
    prune: bool,
) -> std::result::Result<Vec<PathBuf>, StorageError> {
    let mut removed = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Result file already missing: {}", path.display());
                continue;
            }
            Err(e) => {
                return Err(StorageError::RemoveFile {
                    path: path.clone(),
                    source: e,
                })
            }
        };

        let outcome = if metadata.is_dir() {
            fs::remove_dir_all(path).map_err(|e| (e, true))
        } else {
            fs::remove_file(path).map_err(|e| (e, false))
        };
        match outcome {
            Ok(()) => removed.push(path.clone()),
            Err((e, _)) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Result file vanished during removal: {}", path.display());
            }
            Err((e, true)) => {
                return Err(StorageError::RemoveDirectory {
                    path: path.clone(),
                    source: e,
                })
            }
            Err((e, false)) => {
                return Err(StorageError::RemoveFile {
                    path: path.clone(),
                    source: e,
                })
            }
        }

        if prune {
            if let Some(root) = mounts.root_containing(path) {
                prune_empty_parents(path, root)?;
            }
        }
    }
    Ok(removed)
}

fn prune_empty_parents(path: &Path, root: &Path) -> std::result::Result<(), StorageError> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = match fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                return Err(StorageError::ReadDirectory {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        };
        if !is_empty {
            break;
        }
        match fs::remove_dir(dir) {
            Ok(()) => log::debug!("Pruned empty directory {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::RemoveDirectory {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        }
        current = dir.parent();
    }
    Ok(())
}
