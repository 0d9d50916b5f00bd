//! Sync ledger stored inside each golden database
//!
//! One row per completed sync, append-only. The table travels with the golden
//! database and is dropped together with it.

use crate::executor::{parse_timestamp, utc_text, DbError, SqlExecutor};
use chrono::{DateTime, Utc};
use sea_query::{ColumnDef, ColumnType, PostgresQueryBuilder, Table, TableCreateStatement};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ledger table name inside the golden database.
pub const LEDGER_TABLE: &str = "_goldcopy_sync_info";

/// One completed sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMetadata {
    /// Ledger row id (`None` until appended)
    pub id: Option<i64>,
    pub synced_at: DateTime<Utc>,
    /// Source connection string with the password masked
    pub source_masked: String,
    pub excluded_tables: Vec<String>,
    /// Rows copied per table; row-filtered tables carry their exact count
    pub row_counts: BTreeMap<String, i64>,
    pub duration_ms: i64,
    pub incremental: bool,
}

impl SyncMetadata {
    /// Total rows across all tables.
    #[must_use]
    pub fn total_rows(&self) -> i64 {
        self.row_counts.values().sum()
    }
}

/// DDL for the ledger table.
#[must_use]
pub fn create_ledger_table() -> TableCreateStatement {
    Table::create()
        .table(LEDGER_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new("synced_at")
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(ColumnDef::new("source_masked").text().not_null())
        .col(
            ColumnDef::new("excluded_tables")
                .array(ColumnType::Text)
                .not_null(),
        )
        .col(ColumnDef::new("row_counts").json_binary().not_null())
        .col(ColumnDef::new("sync_duration_ms").big_integer().not_null())
        .col(
            ColumnDef::new("incremental")
                .boolean()
                .not_null()
                .default(false),
        )
        .to_owned()
}

/// Create the ledger table if it does not exist.
pub fn ensure_table(executor: &dyn SqlExecutor) -> Result<(), DbError> {
    let sql = create_ledger_table().build(PostgresQueryBuilder);
    executor.execute(&sql, &[]).map(|_| ())
}

/// Whether the ledger table exists in the connected database.
pub fn table_exists(executor: &dyn SqlExecutor) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT to_regclass($1) IS NOT NULL",
        &[&format!("public.{LEDGER_TABLE}")],
    )?;
    row.try_get(0)
        .map_err(|e| DbError::ParseError(format!("to_regclass result: {e}")))
}

/// Append a ledger row and return its id.
pub fn append(executor: &dyn SqlExecutor, metadata: &SyncMetadata) -> Result<i64, DbError> {
    ensure_table(executor)?;

    let row_counts = serde_json::to_string(&metadata.row_counts)
        .map_err(|e| DbError::Other(format!("Failed to serialize row counts: {e}")))?;
    let synced_at = metadata.synced_at.to_rfc3339();

    let sql = format!(
        "INSERT INTO {LEDGER_TABLE} \
         (synced_at, source_masked, excluded_tables, row_counts, sync_duration_ms, incremental) \
         VALUES ($1::text::timestamptz, $2, $3, $4::text::jsonb, $5, $6) RETURNING id"
    );
    let row = executor.query_one(
        &sql,
        &[
            &synced_at,
            &metadata.source_masked,
            &metadata.excluded_tables,
            &row_counts,
            &metadata.duration_ms,
            &metadata.incremental,
        ],
    )?;
    row.try_get(0)
        .map_err(|e| DbError::ParseError(format!("ledger id: {e}")))
}

/// Up to `limit` ledger rows, newest first.
///
/// A golden database without a ledger table (created but never synced, or
/// restored from elsewhere) has no history rather than an error.
pub fn history(executor: &dyn SqlExecutor, limit: i64) -> Result<Vec<SyncMetadata>, DbError> {
    if !table_exists(executor)? {
        log::warn!("sync ledger table {} not found; treating as never synced", LEDGER_TABLE);
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id, {}, source_masked, excluded_tables, row_counts::text, \
         sync_duration_ms, incremental \
         FROM {LEDGER_TABLE} ORDER BY synced_at DESC, id DESC LIMIT $1",
        utc_text("synced_at")
    );
    executor
        .query_all(&sql, &[&limit.max(0)])?
        .iter()
        .map(metadata_from_row)
        .collect()
}

fn metadata_from_row(row: &may_postgres::Row) -> Result<SyncMetadata, DbError> {
    let parse = |what: &str, e: may_postgres::Error| DbError::ParseError(format!("{what}: {e}"));

    let id: i64 = row.try_get(0).map_err(|e| parse("id", e))?;
    let synced_at: String = row.try_get(1).map_err(|e| parse("synced_at", e))?;
    let source_masked: String = row.try_get(2).map_err(|e| parse("source_masked", e))?;
    let excluded_tables: Vec<String> = row.try_get(3).map_err(|e| parse("excluded_tables", e))?;
    let row_counts: String = row.try_get(4).map_err(|e| parse("row_counts", e))?;
    let duration_ms: i64 = row.try_get(5).map_err(|e| parse("sync_duration_ms", e))?;
    let incremental: bool = row.try_get(6).map_err(|e| parse("incremental", e))?;

    Ok(SyncMetadata {
        id: Some(id),
        synced_at: parse_timestamp(&synced_at)?,
        source_masked,
        excluded_tables,
        row_counts: parse_row_counts(&row_counts)?,
        duration_ms,
        incremental,
    })
}

/// Row counts are written by this crate as `{"table": n}`; anything else is
/// treated as corrupt metadata.
fn parse_row_counts(raw: &str) -> Result<BTreeMap<String, i64>, DbError> {
    serde_json::from_str(raw).map_err(|e| DbError::ParseError(format!("row_counts: {e}")))
}
