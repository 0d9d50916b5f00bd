//! `AppliedMigration` - rows of the workspace database's `_prisma_migrations` ledger

use crate::executor::{parse_timestamp, utc_text, DbError, SqlExecutor};
use crate::migration::MigrationError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Migration ledger table maintained by the schema-migration tool.
pub const MIGRATIONS_TABLE: &str = "_prisma_migrations";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub id: String,
    pub migration_name: String,
    /// `SHA-256` hex of the script as it was applied
    pub checksum: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl AppliedMigration {
    /// Expected column order: `id`, `migration_name`, `checksum`, `finished_at`, `rolled_back_at`,
    /// with timestamps rendered by `utc_text`.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, DbError> {
        let parse = |what: &str, e: may_postgres::Error| DbError::ParseError(format!("{what}: {e}"));

        let id: String = row.try_get(0).map_err(|e| parse("id", e))?;
        let migration_name: String = row.try_get(1).map_err(|e| parse("migration_name", e))?;
        let checksum: String = row.try_get(2).map_err(|e| parse("checksum", e))?;
        let finished_at: Option<String> = row.try_get(3).map_err(|e| parse("finished_at", e))?;
        let rolled_back_at: Option<String> =
            row.try_get(4).map_err(|e| parse("rolled_back_at", e))?;

        Ok(Self {
            id,
            migration_name,
            checksum,
            finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
            rolled_back_at: rolled_back_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Applied migrations in apply order, rolled-back rows excluded.
///
/// A database without the ledger table has no applied migrations.
///
/// # Errors
///
/// Returns `MigrationError::Database` if the ledger cannot be read.
pub fn applied_migrations(executor: &dyn SqlExecutor) -> Result<Vec<AppliedMigration>, MigrationError> {
    let row = executor.query_one(
        "SELECT to_regclass($1) IS NOT NULL",
        &[&format!("public.{MIGRATIONS_TABLE}")],
    )?;
    let exists: bool = row
        .try_get(0)
        .map_err(|e| DbError::ParseError(format!("to_regclass result: {e}")))?;
    if !exists {
        log::debug!("{} not found; no migrations applied", MIGRATIONS_TABLE);
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id::text, migration_name, checksum, {}, {} \
         FROM {MIGRATIONS_TABLE} \
         WHERE rolled_back_at IS NULL \
         ORDER BY started_at, migration_name",
        utc_text("finished_at"),
        utc_text("rolled_back_at")
    );
    let rows = executor.query_all(&sql, &[])?;
    rows.iter()
        .map(|row| AppliedMigration::from_row(row).map_err(MigrationError::from))
        .collect()
}
