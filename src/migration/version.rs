use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DictError, Result};

lazy_static! {
    static ref RE_VERSION: Regex = Regex::new(r"^V(\d+(?:_\d+)*)_").unwrap();
}

/// Dotted script version, compared numerically segment by segment.
/// Trailing zero segments do not count: `1.0` equals `1.0.0`.
#[derive(Debug, Clone)]
pub struct MigrationVersion(Vec<u64>);

impl MigrationVersion {
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let malformed = |reason: &str| DictError::MigrationFileRead {
            file: file_name.to_string(),
            reason: reason.to_string(),
        };
        let captures = RE_VERSION
            .captures(file_name)
            .ok_or_else(|| malformed("name does not start with V<n>_<n>_..._"))?;
        let segments = captures[1]
            .split('_')
            .map(|segment| segment.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| malformed(&e.to_string()))?;
        Ok(Self(segments))
    }

    pub fn parse(dotted: &str) -> Result<Self> {
        dotted
            .split('.')
            .map(|segment| segment.trim().parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|e| DictError::Validation(format!("'{}' is not a version: {}", dotted, e)))
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    fn significant(&self) -> &[u64] {
        let len = self.0.iter().rposition(|s| *s != 0).map_or(0, |p| p + 1);
        &self.0[..len]
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for MigrationVersion {}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dotted: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", dotted.join("."))
    }
}

/// Dotted version of a script file name: `V1_10__add_index.sql` gives `1.10`.
pub fn compute_version(file_name: &str) -> Result<String> {
    MigrationVersion::from_file_name(file_name).map(|v| v.to_string())
}

/// Sorts by version; scripts sharing a version keep their relative order.
pub fn order_migrations<T>(scripts: &mut [T], version: impl Fn(&T) -> &MigrationVersion) {
    scripts.sort_by(|a, b| version(a).cmp(version(b)));
}
