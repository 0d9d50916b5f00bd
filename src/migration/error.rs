//! Migration-specific error types

use crate::executor::DbError;
use std::path::PathBuf;

/// Migration detection errors
#[derive(Debug)]
pub enum MigrationError {
    /// Reading the migration ledger failed
    Database(DbError),
    /// Reading a migration directory or script failed
    Io { path: PathBuf, source: std::io::Error },
    /// Migrations directory missing or not a directory
    DirectoryNotFound(PathBuf),
    /// Baseline file could not be parsed or written
    Baseline { path: PathBuf, message: String },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {}", e),
            MigrationError::Io { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            MigrationError::DirectoryNotFound(path) => write!(
                f,
                "Migrations directory not found: {}\n\
                 Suggestion: check the workspace path or engine.migrations_dir",
                path.display()
            ),
            MigrationError::Baseline { path, message } => {
                write!(f, "Invalid migration baseline {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Database(e) => Some(e),
            MigrationError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}
