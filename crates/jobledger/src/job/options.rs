//! Job options: typed values, validation against a command's parameter
//! groups, the canonical stored form and materialization of output paths.
//!
//! Three shapes of an option set exist:
//! - raw: whatever the caller supplied, validated key by key;
//!   this is what the `job.options` column stores;
//! - canonical: every declared non-output parameter present (declared
//!   default when unset), output parameters only when explicitly supplied.
//!   Serialized with sorted keys and compact separators, this is what
//!   duplicate detection compares (`job.canonical_options`);
//! - materialized: the raw options plus a computed path for every output
//!   parameter the caller left unset.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::catalog::{Command, ParameterKind};
use crate::error::{LedgerError, Result};
use crate::job::JobId;

/// A single option value. Options are flat: arrays and objects are rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Path(PathBuf),
}

impl OptionValue {
    pub fn is_null(&self) -> bool {
        matches!(self, OptionValue::Null)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            OptionValue::Path(p) => Some(p),
            _ => None,
        }
    }
}

impl TryFrom<Value> for OptionValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(OptionValue::Null),
            Value::Bool(b) => Ok(OptionValue::Bool(b)),
            Value::Number(n) => n
                .as_i64()
                .map(OptionValue::Int)
                .or_else(|| n.as_f64().map(OptionValue::Float))
                .ok_or_else(|| format!("unsupported number {}", n)),
            Value::String(s) => Ok(OptionValue::Text(s)),
            Value::Array(_) => Err("arrays are not valid option values".to_string()),
            Value::Object(_) => Err("objects are not valid option values".to_string()),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            OptionValue::Null => serializer.serialize_unit(),
            OptionValue::Bool(b) => serializer.serialize_bool(*b),
            OptionValue::Int(i) => serializer.serialize_i64(*i),
            OptionValue::Float(f) => serializer.serialize_f64(*f),
            OptionValue::Text(s) => serializer.serialize_str(s),
            OptionValue::Path(p) => serializer.serialize_str(&p.to_string_lossy()),
        }
    }
}

impl<'de> Deserialize<'de> for OptionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        OptionValue::try_from(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Null => f.write_str("null"),
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Text(s) => f.write_str(s),
            OptionValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<f64> for OptionValue {
    fn from(x: f64) -> Self {
        OptionValue::Float(x)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Text(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Text(s)
    }
}

impl From<PathBuf> for OptionValue {
    fn from(p: PathBuf) -> Self {
        OptionValue::Path(p)
    }
}

/// An option set keyed by parameter name. Keys iterate in lexicographic
/// order, which is what makes the serialized form canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOptions(BTreeMap<String, OptionValue>);

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of flat values.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| LedgerError::InvalidOption {
            key: String::new(),
            reason: format!("not valid JSON: {}", e),
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(LedgerError::InvalidOption {
                key: String::new(),
                reason: "options must be a JSON object".to_string(),
            });
        };
        map.into_iter()
            .map(|(key, value)| match OptionValue::try_from(value) {
                Ok(v) => Ok((key, v)),
                Err(reason) => Err(LedgerError::InvalidOption { key, reason }),
            })
            .collect()
    }

    /// Compact JSON with keys in lexicographic order.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0).map_err(|e| LedgerError::InvalidOption {
            key: String::new(),
            reason: e.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Option<OptionValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, OptionValue)> for JobOptions {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<OptionValue>, const N: usize> From<[(K, V); N]> for JobOptions {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl IntoIterator for JobOptions {
    type Item = (String, OptionValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, OptionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Checks every raw key against the command's declared parameters.
pub fn validate(raw: &JobOptions, command: &Command) -> Result<()> {
    for (key, value) in raw.iter() {
        if !command.declares(key) {
            return Err(LedgerError::InvalidOption {
                key: key.clone(),
                reason: format!("not a parameter of '{}'", command.name),
            });
        }
        if let OptionValue::Float(x) = value {
            if !x.is_finite() {
                return Err(LedgerError::InvalidOption {
                    key: key.clone(),
                    reason: "numbers must be finite".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Canonical form of a raw option set. Idempotent.
pub fn canonicalize(raw: &JobOptions, command: &Command) -> Result<JobOptions> {
    validate(raw, command)?;

    let mut canonical = JobOptions::new();
    for (kind, group) in command.groups() {
        if kind == ParameterKind::Output {
            continue;
        }
        for (key, default) in group {
            canonical.insert(key.clone(), default.clone());
        }
    }
    for (key, value) in raw.iter() {
        let is_output = matches!(command.parameter(key), Some((ParameterKind::Output, _)));
        match value {
            OptionValue::Null if is_output => continue,
            OptionValue::Path(p) => canonical.insert(key.clone(), OptionValue::Text(p.to_string_lossy().into_owned())),
            other => canonical.insert(key.clone(), other.clone()),
        };
    }
    Ok(canonical)
}

/// The stored JSON text for a raw option set.
pub fn canonical_json(raw: &JobOptions, command: &Command) -> Result<String> {
    canonicalize(raw, command)?.to_json()
}

/// Default path of one output parameter:
/// `<results_root>/<job_id>_<script>_<name without leading dashes>`.
pub fn output_path(results_root: &Path, job_id: JobId, script: &str, parameter: &str) -> PathBuf {
    let name = parameter.trim_start_matches('-');
    results_root.join(format!("{}_{}_{}", job_id, script, name))
}

/// Computed values for every output parameter whose default is a
/// placeholder (`null`). Nothing is created on disk.
pub fn output_defaults(command: &Command, job_id: JobId, results_root: &Path) -> JobOptions {
    command
        .output
        .iter()
        .map(|(key, default)| {
            let value = match default {
                OptionValue::Null => OptionValue::Path(output_path(results_root, job_id, &command.script, key)),
                OptionValue::Text(s) => OptionValue::Path(PathBuf::from(s)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// The stored JSON text for a raw option set: validated, otherwise as given.
pub fn stored_json(raw: &JobOptions, command: &Command) -> Result<String> {
    validate(raw, command)?;
    raw.to_json()
}

/// Raw options merged over the computed output defaults; raw values win.
/// Output values are returned as paths, and an output left `null` keeps its
/// default.
pub fn materialize(
    raw: &JobOptions,
    command: &Command,
    job_id: JobId,
    results_root: &Path,
) -> Result<JobOptions> {
    validate(raw, command)?;

    let mut options = output_defaults(command, job_id, results_root);
    for (key, value) in raw.iter() {
        let is_output = matches!(command.parameter(key), Some((ParameterKind::Output, _)));
        let value = match value {
            OptionValue::Null if is_output => continue,
            OptionValue::Text(s) if is_output => OptionValue::Path(PathBuf::from(s)),
            other => other.clone(),
        };
        options.insert(key.clone(), value);
    }
    Ok(options)
}
