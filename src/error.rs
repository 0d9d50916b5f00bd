//! Engine error taxonomy

use crate::connection::ConnectionError;
use crate::executor::DbError;
use crate::migration::MigrationError;
use crate::transfer::TransferError;
use std::fmt;

/// Step of a sync that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Create,
    Analyze,
    Transfer,
    Metadata,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStep::Create => "create",
            SyncStep::Analyze => "analyze",
            SyncStep::Transfer => "transfer",
            SyncStep::Metadata => "metadata",
        })
    }
}

/// Errors returned by the golden-copy engine
#[derive(Debug)]
pub enum EngineError {
    /// Source or local server unreachable, or bad credentials
    Connection(ConnectionError),
    /// Caller-facing precondition failure; the message names the fix
    Validation(String),
    /// Another sync for the same project is in flight
    AlreadySyncing(String),
    /// Catalog query failed
    Introspection(DbError),
    /// Query against the local server failed
    Database(DbError),
    /// Producer or consumer process failed
    Transfer(TransferError),
    /// Operation cancelled by the caller
    Cancelled,
    /// Reading or writing the sync ledger failed
    Metadata(String),
    /// Migration detection failed
    Migration(MigrationError),
    /// Filesystem error
    Io(std::io::Error),
    /// A sync step failed for a project
    Sync {
        project: String,
        step: SyncStep,
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Whether this error (or the error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            EngineError::Cancelled | EngineError::Transfer(TransferError::Cancelled) => true,
            EngineError::Sync { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn in_step(self, project: &str, step: SyncStep) -> Self {
        EngineError::Sync {
            project: project.to_string(),
            step,
            source: Box::new(self),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Connection(e) => write!(f, "Connection failed: {}", e),
            EngineError::Validation(msg) => f.write_str(msg),
            EngineError::AlreadySyncing(project) => write!(
                f,
                "Project '{}' is already syncing; wait for the running sync to finish",
                project
            ),
            EngineError::Introspection(e) => write!(f, "Failed to introspect source: {}", e),
            EngineError::Database(e) => write!(f, "Database error: {}", e),
            EngineError::Transfer(e) => write!(f, "Transfer failed: {}", e),
            EngineError::Cancelled => f.write_str("Operation cancelled"),
            EngineError::Metadata(msg) => write!(f, "Sync metadata error: {}", msg),
            EngineError::Migration(e) => write!(f, "Migration check failed: {}", e),
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::Sync {
                project,
                step,
                source,
            } => write!(f, "Sync of project '{}' failed during {}: {}", project, step, source),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Connection(e) => Some(e),
            EngineError::Introspection(e) | EngineError::Database(e) => Some(e),
            EngineError::Transfer(e) => Some(e),
            EngineError::Migration(e) => Some(e),
            EngineError::Io(e) => Some(e),
            EngineError::Sync { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ConnectionError> for EngineError {
    fn from(err: ConnectionError) -> Self {
        EngineError::Connection(err)
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::Database(err)
    }
}

impl From<TransferError> for EngineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => EngineError::Cancelled,
            other => EngineError::Transfer(other),
        }
    }
}

impl From<MigrationError> for EngineError {
    fn from(err: MigrationError) -> Self {
        EngineError::Migration(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}
