//! `SqlExecutor` - database execution seam over `may_postgres`
//!
//! The analyzer, ledger and migration detector only talk to PostgreSQL through
//! this trait, so they can run against a plain client regardless of which
//! server (source, golden, workspace) it points at.

use crate::connection::{connect, ConnectionError, ConnectionInfo};
use chrono::{DateTime, NaiveDateTime, Utc};
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;
use std::time::{Duration, Instant};

/// Executor error type
#[derive(Debug)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Row parsing/conversion error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            DbError::ParseError(s) => write!(f, "Parse error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::PostgresError(err)
    }
}

/// Trait for executing database operations
pub trait SqlExecutor {
    /// Execute a SQL statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    /// Execute a query that must return exactly one row
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or does not return exactly one row.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError>;
}

/// `SqlExecutor` backed by a `may_postgres::Client`.
pub struct PgExecutor {
    client: Client,
    label: String,
}

impl PgExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client, label: impl Into<String>) -> Self {
        Self {
            client,
            label: label.into(),
        }
    }

    /// Connect to `info` and wrap the client.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the server cannot be reached.
    pub fn connect(info: &ConnectionInfo, timeout: Duration) -> Result<Self, ConnectionError> {
        let client = connect(info, timeout)?;
        Ok(Self::new(client, info.database.clone()))
    }

    /// Bound every subsequent statement on this session.
    ///
    /// Introspection against a remote source must not hang on an unresponsive
    /// server, so callers set this before running catalog queries.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the `SET` fails.
    pub fn set_statement_timeout(&self, timeout: Duration) -> Result<(), DbError> {
        let sql = format!("SET statement_timeout = '{}ms'", timeout.as_millis());
        self.execute(&sql, &[]).map(|_| ())
    }
}

impl SqlExecutor for PgExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        let start = Instant::now();
        let result = self.client.execute(query, params).map_err(DbError::PostgresError);
        log::trace!("[{}] execute took {:?}: {}", self.label, start.elapsed(), query.trim());
        result
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        let start = Instant::now();
        let result = self.client.query_one(query, params).map_err(DbError::PostgresError);
        log::trace!("[{}] query_one took {:?}: {}", self.label, start.elapsed(), query.trim());
        result
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        let start = Instant::now();
        let result = self.client.query(query, params).map_err(DbError::PostgresError);
        log::trace!("[{}] query took {:?}: {}", self.label, start.elapsed(), query.trim());
        result
    }
}

/// SQL expression rendering a timestamp column as UTC text that
/// [`parse_timestamp`] understands, independent of the session `DateStyle`.
pub(crate) fn utc_text(column: &str) -> String {
    format!(
        "to_char({} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.US')",
        column
    )
}

/// Parse a timestamp returned as text by `may_postgres`.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DbError::ParseError(format!("unrecognized timestamp '{raw}'")))
}
