//! Captured migration baselines
//!
//! A baseline is the shape of a migration history at one point in time. Two
//! baselines can be compared offline, e.g. the golden copy's history against
//! a branch checkout.

use crate::executor::SqlExecutor;
use crate::migration::{applied_migrations, discover_migrations, Compatibility, MigrationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationBaseline {
    /// Migration names in apply order
    pub migrations: Vec<String>,
    pub last_migration: Option<String>,
    pub last_checksum: Option<String>,
    pub total: usize,
    pub captured_at: DateTime<Utc>,
}

impl MigrationBaseline {
    /// Build from `(name, checksum)` pairs in apply order.
    #[must_use]
    pub fn from_entries(entries: Vec<(String, Option<String>)>) -> Self {
        let (last_migration, last_checksum) = match entries.last() {
            Some((name, checksum)) => (Some(name.clone()), checksum.clone()),
            None => (None, None),
        };
        Self {
            total: entries.len(),
            migrations: entries.into_iter().map(|(name, _)| name).collect(),
            last_migration,
            last_checksum,
            captured_at: Utc::now(),
        }
    }

    /// Capture from a database's migration ledger.
    pub fn capture_from_database(executor: &dyn SqlExecutor) -> Result<Self, MigrationError> {
        let applied = applied_migrations(executor)?;
        Ok(Self::from_entries(
            applied
                .into_iter()
                .map(|m| (m.migration_name, Some(m.checksum)))
                .collect(),
        ))
    }

    /// Capture from a migrations directory.
    pub fn capture_from_disk(migrations_dir: &Path) -> Result<Self, MigrationError> {
        let files = discover_migrations(migrations_dir)?;
        Ok(Self::from_entries(
            files.into_iter().map(|f| (f.name, f.checksum)).collect(),
        ))
    }

    pub fn save(&self, path: &Path) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| MigrationError::Baseline {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, json).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let raw = fs::read_to_string(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| MigrationError::Baseline {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn same_head(&self, other: &Self) -> bool {
        self.total == other.total
            && self.last_migration == other.last_migration
            && self.last_checksum == other.last_checksum
    }

    fn is_strict_prefix_of(&self, other: &Self) -> bool {
        self.migrations.len() < other.migrations.len()
            && other.migrations.starts_with(&self.migrations)
    }
}

/// Compare a reference baseline (e.g. the golden copy) with a current one
/// (e.g. a branch checkout).
///
/// `Forward` means `current` extends `reference`; `Behind` means `reference`
/// extends `current`.
#[must_use]
pub fn compare_baselines(
    reference: Option<&MigrationBaseline>,
    current: Option<&MigrationBaseline>,
) -> Compatibility {
    let (Some(reference), Some(current)) = (reference, current) else {
        return Compatibility::Unknown;
    };

    if reference.same_head(current) {
        Compatibility::Synced
    } else if reference.is_strict_prefix_of(current) {
        Compatibility::Forward
    } else if current.is_strict_prefix_of(reference) {
        Compatibility::Behind
    } else {
        Compatibility::Diverged
    }
}
