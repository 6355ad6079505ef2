use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File category holding job results.
pub const JOB_MOUNT: &str = "job";

/// Root directory per logical file category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mountpoints {
    roots: BTreeMap<String, PathBuf>,
}

impl Mountpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount<P: AsRef<Path>>(mut self, category: &str, root: P) -> Self {
        self.insert(category, root);
        self
    }

    pub fn insert<P: AsRef<Path>>(&mut self, category: &str, root: P) {
        self.roots
            .insert(category.to_string(), root.as_ref().to_path_buf());
    }

    pub fn root(&self, category: &str) -> Result<&Path, ConfigError> {
        self.roots
            .get(category)
            .map(PathBuf::as_path)
            .ok_or_else(|| ConfigError::MissingMount(category.to_string()))
    }

    pub fn job_root(&self) -> Result<&Path, ConfigError> {
        self.root(JOB_MOUNT)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.roots.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Path relative to the category root. Relative inputs are taken as
    /// already relative. Returns `None` for paths outside the root or
    /// containing `..`.
    pub fn relativize(&self, category: &str, path: &Path) -> Option<PathBuf> {
        let root = self.roots.get(category)?;
        let relative = if path.is_absolute() {
            path.strip_prefix(root).ok()?
        } else {
            path
        };
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(
            relative
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        )
    }

    /// Absolute path of a stored filepath.
    pub fn resolve(&self, category: &str, stored: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.root(category)?.join(stored))
    }

    /// The configured root that contains `path`, if any.
    pub fn root_containing(&self, path: &Path) -> Option<&Path> {
        self.roots
            .values()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

/// Stored form of a relative path: components joined with `/`.
pub fn to_stored(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
