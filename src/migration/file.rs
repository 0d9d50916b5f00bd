//! Migration directory discovery
//!
//! Layout: `<migrations_dir>/<name>/migration.sql`, one directory per
//! migration, names sorting in apply order (timestamp prefixes). Loose files
//! such as `migration_lock.toml` are ignored.

use crate::migration::{calculate_checksum, MigrationError};
use std::fs;
use std::path::{Path, PathBuf};

/// Script file inside each migration directory.
pub const MIGRATION_SCRIPT: &str = "migration.sql";

/// A migration found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Directory name, which is also the ledger's `migration_name`
    pub name: String,
    /// Path to `migration.sql`
    pub path: PathBuf,
    /// SHA-256 of the script, `None` if it could not be read
    pub checksum: Option<String>,
}

/// Whether `workspace` keeps migrations under `migrations_dir`.
#[must_use]
pub fn uses_migration_convention(workspace: &Path, migrations_dir: &str) -> bool {
    workspace.join(migrations_dir).is_dir()
}

/// Discover all migrations in a directory, sorted by name.
///
/// A script whose checksum cannot be computed is still listed, with
/// `checksum: None`, so that callers can flag it instead of skipping it.
///
/// # Errors
///
/// Returns `DirectoryNotFound` if `migrations_dir` is not a directory, or
/// `Io` if it cannot be listed.
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    if !migrations_dir.is_dir() {
        return Err(MigrationError::DirectoryNotFound(migrations_dir.to_path_buf()));
    }

    let io_err = |source| MigrationError::Io {
        path: migrations_dir.to_path_buf(),
        source,
    };

    let mut migrations = Vec::new();
    for entry in fs::read_dir(migrations_dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let script = dir.join(MIGRATION_SCRIPT);
        if !script.is_file() {
            log::debug!("skipping {}: no {}", dir.display(), MIGRATION_SCRIPT);
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            log::warn!("skipping migration directory with non-UTF-8 name: {}", dir.display());
            continue;
        };

        let checksum = match calculate_checksum(&script) {
            Ok(sum) => Some(sum),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        };

        migrations.push(MigrationFile {
            name,
            path: script,
            checksum,
        });
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_migration(root: &Path, name: &str, sql: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MIGRATION_SCRIPT), sql).unwrap();
    }

    #[test]
    fn test_discover_sorted_and_ignores_noise() {
        let root = tempfile::tempdir().unwrap();
        write_migration(root.path(), "20240201000000_add_orders", "CREATE TABLE orders ();");
        write_migration(root.path(), "20240101000000_init", "CREATE TABLE users ();");
        fs::write(root.path().join("migration_lock.toml"), "provider = \"postgresql\"").unwrap();
        fs::create_dir_all(root.path().join("empty_dir")).unwrap();

        let found = discover_migrations(root.path()).unwrap();
        let names: Vec<_> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["20240101000000_init", "20240201000000_add_orders"]);
        assert!(found.iter().all(|m| m.checksum.is_some()));
    }

    #[test]
    fn test_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let err = discover_migrations(&root.path().join("prisma/migrations")).unwrap_err();
        assert!(matches!(err, MigrationError::DirectoryNotFound(_)));
        assert!(!uses_migration_convention(root.path(), "prisma/migrations"));
    }

    #[test]
    fn test_convention_detected() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("prisma/migrations")).unwrap();
        assert!(uses_migration_convention(root.path(), "prisma/migrations"));
    }
}
