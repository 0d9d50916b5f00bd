//! Database-level operations on the local server
//!
//! Golden copies and workspace databases are whole databases on one local
//! server. Everything here runs on a maintenance connection to that server.

use crate::connection::{parse_connection_string, quote_identifier, ConnectionInfo};
use crate::error::EngineError;
use crate::executor::{DbError, PgExecutor, SqlExecutor};
use serde::Serialize;
use std::time::Duration;

/// A database on the local server with its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSize {
    pub name: String,
    pub size_bytes: i64,
}

/// The local server that hosts golden copies and workspace databases.
#[derive(Debug, Clone)]
pub struct LocalServer {
    admin: ConnectionInfo,
    timeout: Duration,
}

impl LocalServer {
    /// `url` points at a maintenance database (usually `postgres`).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if `url` is not a PostgreSQL URI.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let admin = parse_connection_string(url).map_err(|e| {
            EngineError::Validation(format!(
                "Invalid local server connection string: {e}; fix engine.local_server_url"
            ))
        })?;
        Ok(Self { admin, timeout })
    }

    /// Connection details for `database` on this server.
    #[must_use]
    pub fn database(&self, database: &str) -> ConnectionInfo {
        self.admin.with_database(database)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to `database` on this server.
    pub fn connect(&self, database: &str) -> Result<PgExecutor, EngineError> {
        Ok(PgExecutor::connect(&self.database(database), self.timeout)?)
    }

    fn admin(&self) -> Result<PgExecutor, EngineError> {
        Ok(PgExecutor::connect(&self.admin, self.timeout)?)
    }

    pub fn database_exists(&self, name: &str) -> Result<bool, EngineError> {
        let admin = self.admin()?;
        Ok(database_exists(&admin, name)?)
    }

    /// Create `name`; returns `false` if it already existed.
    pub fn create_database(&self, name: &str) -> Result<bool, EngineError> {
        let admin = self.admin()?;
        if database_exists(&admin, name)? {
            return Ok(false);
        }
        log::info!("creating database {}", name);
        admin.execute(&format!("CREATE DATABASE {}", quote_identifier(name)), &[])?;
        Ok(true)
    }

    /// Drop `name`, disconnecting its sessions first; returns `false` if absent.
    pub fn drop_database(&self, name: &str) -> Result<bool, EngineError> {
        let admin = self.admin()?;
        if !database_exists(&admin, name)? {
            return Ok(false);
        }
        log::info!("dropping database {}", name);
        admin.query_all(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
            &[&name],
        )?;
        admin.execute(&format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)), &[])?;
        Ok(true)
    }

    /// Size in bytes, `None` if the database does not exist.
    pub fn database_size(&self, name: &str) -> Result<Option<i64>, EngineError> {
        let admin = self.admin()?;
        if !database_exists(&admin, name)? {
            return Ok(None);
        }
        let row = admin.query_one("SELECT pg_database_size($1)", &[&name])?;
        Ok(Some(row.try_get(0).map_err(DbError::from)?))
    }

    /// Databases whose name ends with `suffix`, largest first.
    pub fn databases_with_suffix(&self, suffix: &str) -> Result<Vec<DatabaseSize>, EngineError> {
        let admin = self.admin()?;
        let pattern = format!("%{}", escape_like(suffix));
        let rows = admin.query_all(
            "SELECT datname::text, pg_database_size(datname) \
             FROM pg_database \
             WHERE datname LIKE $1 AND NOT datistemplate \
             ORDER BY 2 DESC, 1",
            &[&pattern],
        )?;
        let sizes = rows
            .iter()
            .map(|row| -> Result<DatabaseSize, DbError> {
                Ok(DatabaseSize {
                    name: row.try_get(0)?,
                    size_bytes: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sizes)
    }
}

fn database_exists(executor: &dyn SqlExecutor, name: &str) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)",
        &[&name],
    )?;
    Ok(row.try_get(0)?)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
