//! Schema and table analysis of the source database
//!
//! Everything here is read-only catalog introspection. Results are ephemeral:
//! they are recomputed for every sync or `analyze` run and never persisted.

use crate::connection::qualify;
use crate::executor::{DbError, SqlExecutor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Name fragments that suggest an audit, log or queue table.
pub const AUDIT_PATTERNS: &[&str] = &[
    "log", "logs", "audit", "audits", "event", "events", "history", "histories", "activity",
    "activities", "tracking", "trackings", "archive", "archives", "backup", "backups", "queue",
    "queues", "job", "jobs", "notification", "notifications", "email", "emails", "message",
    "messages", "session", "sessions",
];

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Row count above which narrow tables are treated as log-like.
const AUDIT_ROW_THRESHOLD: i64 = 1_000_000;
/// Average row size (bytes) under which a very large table looks like a log.
const AUDIT_MAX_AVG_ROW_BYTES: i64 = 500;
/// Audit-looking tables above this many rows are suggested for exclusion.
const SUGGEST_AUDIT_MIN_ROWS: i64 = 100_000;

/// Size and shape of one source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// Total relation size including indexes and TOAST
    pub size_bytes: i64,
    /// Approximate live rows from the statistics collector (0 if unknown)
    pub row_count: i64,
    pub has_indexes: bool,
    pub is_likely_audit: bool,
}

impl TableInfo {
    #[must_use]
    pub fn new(schema: &str, name: &str, size_bytes: i64, row_count: i64, has_indexes: bool) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            size_bytes,
            row_count,
            has_indexes,
            is_likely_audit: is_likely_audit_table(name, row_count, size_bytes),
        }
    }

    /// `schema.table`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A single-column foreign key edge (multi-column keys yield one per column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyInfo {
    pub constraint_name: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKeyInfo {
    /// Referencing (child) table as `schema.table`
    #[must_use]
    pub fn table_qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Referenced (parent) table as `schema.table`
    #[must_use]
    pub fn referenced_table_qualified(&self) -> String {
        format!("{}.{}", self.referenced_schema, self.referenced_table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    /// Key columns in index order (expression entries are skipped)
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

/// Column layout of every table, keyed by `schema.table`.
pub type SchemaSnapshot = BTreeMap<String, TableSchema>;

/// Column-level changes to one table between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableChange {
    pub table: String,
    pub added_columns: Vec<String>,
    pub removed_columns: Vec<String>,
    /// Columns whose type, nullability or default changed
    pub changed_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub added_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    pub modified_tables: Vec<TableChange>,
}

impl SchemaDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty() && self.removed_tables.is_empty() && self.modified_tables.is_empty()
    }
}

/// Whether a table is probably an audit/log/queue table.
///
/// Either the unqualified name contains one of [`AUDIT_PATTERNS`], or the
/// table is very large with narrow rows. Only feeds exclusion suggestions.
#[must_use]
pub fn is_likely_audit_table(name: &str, row_count: i64, size_bytes: i64) -> bool {
    let lower = name.to_ascii_lowercase();
    if AUDIT_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return true;
    }
    row_count > AUDIT_ROW_THRESHOLD && size_bytes / row_count < AUDIT_MAX_AVG_ROW_BYTES
}

/// Tables worth excluding from a sync, as `schema.table`, largest first.
///
/// A table is suggested when it exceeds `threshold_mb` (only when the
/// threshold is positive) or when it looks like an audit table and has more
/// than 100,000 rows. Each table appears at most once.
#[must_use]
pub fn suggest_exclusions(tables: &[TableInfo], threshold_mb: u64) -> Vec<String> {
    let threshold_bytes = i64::try_from(threshold_mb)
        .unwrap_or(i64::MAX / BYTES_PER_MB)
        .saturating_mul(BYTES_PER_MB);
    let mut seen = BTreeSet::new();
    let mut suggested = Vec::new();

    for table in tables {
        let too_big = threshold_mb > 0 && table.size_bytes > threshold_bytes;
        let noisy = table.is_likely_audit && table.row_count > SUGGEST_AUDIT_MIN_ROWS;
        if (too_big || noisy) && seen.insert(table.qualified_name()) {
            suggested.push(table.qualified_name());
        }
    }
    suggested
}

/// Tables exceeding `threshold_mb`; the only automatic exclusion rule a sync applies.
#[must_use]
pub fn size_threshold_exclusions(tables: &[TableInfo], threshold_mb: u64) -> Vec<String> {
    if threshold_mb == 0 {
        return Vec::new();
    }
    let threshold_bytes = i64::try_from(threshold_mb)
        .unwrap_or(i64::MAX / BYTES_PER_MB)
        .saturating_mul(BYTES_PER_MB);
    tables
        .iter()
        .filter(|t| t.size_bytes > threshold_bytes)
        .map(TableInfo::qualified_name)
        .collect()
}

/// List user tables with their size and approximate row count, largest first.
///
/// # Errors
///
/// Returns `DbError` if the catalog query fails.
pub fn list_tables(executor: &dyn SqlExecutor) -> Result<Vec<TableInfo>, DbError> {
    // LEFT JOIN: tables never analyzed have no statistics row.
    let sql = r#"
        SELECT n.nspname::text,
               c.relname::text,
               pg_total_relation_size(c.oid)::bigint,
               COALESCE(s.n_live_tup, 0)::bigint,
               c.relhasindex
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid
        WHERE c.relkind IN ('r', 'p')
          AND n.nspname NOT IN ('pg_catalog', 'information_schema')
          AND n.nspname NOT LIKE 'pg_toast%'
          AND n.nspname NOT LIKE 'pg_temp%'
        ORDER BY 3 DESC, 1, 2
    "#;

    let rows = executor.query_all(sql, &[])?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: String = row.try_get(0)?;
        let name: String = row.try_get(1)?;
        let size_bytes: i64 = row.try_get(2)?;
        let row_count: i64 = row.try_get(3)?;
        let has_indexes: bool = row.try_get(4)?;
        tables.push(TableInfo::new(&schema, &name, size_bytes, row_count, has_indexes));
    }
    Ok(tables)
}

/// One row per (constraint, column pair). Constraints are read from
/// `pg_constraint` and resolved through OIDs: constraint names are only unique
/// per table, and the `information_schema` views hide constraints on tables the
/// role does not own.
const FOREIGN_KEYS_SQL: &str = r#"
    SELECT con.conname::text,
           cn.nspname::text,
           c.relname::text,
           ca.attname::text,
           pn.nspname::text,
           p.relname::text,
           pa.attname::text
    FROM pg_constraint con
    JOIN pg_class c ON c.oid = con.conrelid
    JOIN pg_namespace cn ON cn.oid = c.relnamespace
    JOIN pg_class p ON p.oid = con.confrelid
    JOIN pg_namespace pn ON pn.oid = p.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(child_attnum, parent_attnum, ord)
    JOIN pg_attribute ca ON ca.attrelid = con.conrelid AND ca.attnum = k.child_attnum
    JOIN pg_attribute pa ON pa.attrelid = con.confrelid AND pa.attnum = k.parent_attnum
    WHERE con.contype = 'f'
      AND cn.nspname NOT IN ('pg_catalog', 'information_schema')
    ORDER BY 2, 3, 1, k.ord
"#;

/// Foreign keys whose referencing table is in `subset` (all when empty).
///
/// # Errors
///
/// Returns `DbError` if the catalog query fails.
pub fn foreign_keys(
    executor: &dyn SqlExecutor,
    subset: &[String],
) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let mut keys = Vec::new();
    for row in executor.query_all(FOREIGN_KEYS_SQL, &[])? {
        keys.push(ForeignKeyInfo {
            constraint_name: row.try_get(0)?,
            schema: row.try_get(1)?,
            table: row.try_get(2)?,
            column: row.try_get(3)?,
            referenced_schema: row.try_get(4)?,
            referenced_table: row.try_get(5)?,
            referenced_column: row.try_get(6)?,
        });
    }
    Ok(retain_subset(keys, subset))
}

/// Keep the edges whose referencing table is in `subset` (all when empty).
fn retain_subset(keys: Vec<ForeignKeyInfo>, subset: &[String]) -> Vec<ForeignKeyInfo> {
    match subset_filter(subset) {
        Some(wanted) => keys
            .into_iter()
            .filter(|fk| wanted.contains(&fk.table_qualified()))
            .collect(),
        None => keys,
    }
}

/// Indexes of tables in `subset` (all when empty), keyed by `schema.table`.
///
/// # Errors
///
/// Returns `DbError` if the catalog query fails.
pub fn indexes(
    executor: &dyn SqlExecutor,
    subset: &[String],
) -> Result<BTreeMap<String, Vec<IndexInfo>>, DbError> {
    let sql = r#"
        SELECT n.nspname::text,
               t.relname::text,
               i.relname::text,
               ARRAY(
                   SELECT a.attname::text
                   FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
                   JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                   ORDER BY k.ord
               ),
               ix.indisunique,
               ix.indisprimary
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
          AND n.nspname NOT LIKE 'pg_toast%'
        ORDER BY 1, 2, 3
    "#;

    let wanted = subset_filter(subset);
    let mut by_table: BTreeMap<String, Vec<IndexInfo>> = BTreeMap::new();
    for row in executor.query_all(sql, &[])? {
        let index = IndexInfo {
            schema: row.try_get(0)?,
            table: row.try_get(1)?,
            name: row.try_get(2)?,
            columns: row.try_get(3)?,
            is_unique: row.try_get(4)?,
            is_primary: row.try_get(5)?,
        };
        let key = format!("{}.{}", index.schema, index.table);
        if wanted.as_ref().map_or(true, |w| w.contains(&key)) {
            by_table.entry(key).or_default().push(index);
        }
    }
    Ok(by_table)
}

/// Column layout of every user table and view.
///
/// # Errors
///
/// Returns `DbError` if the catalog query fails.
pub fn schema_snapshot(executor: &dyn SqlExecutor) -> Result<SchemaSnapshot, DbError> {
    let sql = r#"
        SELECT table_schema::text,
               table_name::text,
               column_name::text,
               data_type::text,
               (is_nullable::text = 'YES'),
               column_default::text
        FROM information_schema.columns
        WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
        ORDER BY table_schema, table_name, ordinal_position
    "#;

    let mut snapshot = SchemaSnapshot::new();
    for row in executor.query_all(sql, &[])? {
        let schema: String = row.try_get(0)?;
        let table: String = row.try_get(1)?;
        let column = ColumnSchema {
            name: row.try_get(2)?,
            data_type: row.try_get(3)?,
            is_nullable: row.try_get(4)?,
            default: row.try_get(5)?,
        };
        snapshot
            .entry(format!("{}.{}", schema, table))
            .or_default()
            .columns
            .push(column);
    }
    Ok(snapshot)
}

/// Tables and columns added, removed or changed between two snapshots.
#[must_use]
pub fn diff_schemas(old: &SchemaSnapshot, new: &SchemaSnapshot) -> SchemaDiff {
    let mut diff = SchemaDiff {
        added_tables: new.keys().filter(|t| !old.contains_key(*t)).cloned().collect(),
        removed_tables: old.keys().filter(|t| !new.contains_key(*t)).cloned().collect(),
        modified_tables: Vec::new(),
    };

    for (table, old_schema) in old {
        let Some(new_schema) = new.get(table) else {
            continue;
        };
        let old_cols: BTreeMap<&str, &ColumnSchema> =
            old_schema.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let new_cols: BTreeMap<&str, &ColumnSchema> =
            new_schema.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        let change = TableChange {
            table: table.clone(),
            added_columns: new_cols
                .keys()
                .filter(|c| !old_cols.contains_key(*c))
                .map(|c| c.to_string())
                .collect(),
            removed_columns: old_cols
                .keys()
                .filter(|c| !new_cols.contains_key(*c))
                .map(|c| c.to_string())
                .collect(),
            changed_columns: old_cols
                .iter()
                .filter(|(name, col)| new_cols.get(*name).is_some_and(|n| n != *col))
                .map(|(name, _)| name.to_string())
                .collect(),
        };

        if !(change.added_columns.is_empty()
            && change.removed_columns.is_empty()
            && change.changed_columns.is_empty())
        {
            diff.modified_tables.push(change);
        }
    }

    diff
}

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("static regex"));
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(::\s*)?("[^"]+"|[A-Za-z_][A-Za-z0-9_$.]*)(\s*\()?"#).expect("static regex")
});

const SQL_WORDS: &[&str] = &[
    "and", "or", "not", "null", "is", "in", "like", "ilike", "between", "true", "false",
    "interval", "current_date", "current_timestamp", "current_time", "localtimestamp",
    "localtime", "now", "select", "from", "where", "exists", "any", "all", "some", "case",
    "when", "then", "else", "end", "as", "distinct", "similar", "to", "escape", "date",
    "timestamp", "time", "with", "without", "zone", "at", "asc", "desc", "limit",
];

/// Column names a row-filter predicate appears to reference.
///
/// A lexical scan, not a parser: string literals, function names, type casts
/// and SQL keywords are skipped; qualified references keep their last part.
#[must_use]
pub fn filter_columns(predicate: &str) -> Vec<String> {
    let stripped = STRING_LITERAL.replace_all(predicate, " ");
    let mut columns = Vec::new();

    for caps in IDENTIFIER.captures_iter(&stripped) {
        if caps.get(1).is_some() || caps.get(3).is_some() {
            continue;
        }
        let raw = &caps[2];
        let name = if raw.starts_with('"') {
            raw.trim_matches('"').to_string()
        } else {
            let last = raw.rsplit('.').next().unwrap_or(raw);
            last.to_ascii_lowercase()
        };
        if name.is_empty() || SQL_WORDS.contains(&name.as_str()) {
            continue;
        }
        if !columns.contains(&name) {
            columns.push(name);
        }
    }
    columns
}

/// Warnings for row filters on columns that do not lead any index.
///
/// `filters` maps `schema.table` to its predicate. Each warning names the table
/// and column; nothing here is fatal.
#[must_use]
pub fn filter_index_warnings(
    filters: &BTreeMap<String, String>,
    indexes: &BTreeMap<String, Vec<IndexInfo>>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for (table, predicate) in filters {
        let leading: BTreeSet<&str> = indexes
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|index| index.columns.first().map(String::as_str))
            .collect();
        for column in filter_columns(predicate) {
            if !leading.contains(column.as_str()) {
                warnings.push(format!(
                    "row filter on {} uses column '{}' which has no index leading with it; \
                     the filtered copy will scan the whole table",
                    table, column
                ));
            }
        }
    }
    warnings
}

fn subset_filter(subset: &[String]) -> Option<BTreeSet<String>> {
    if subset.is_empty() {
        None
    } else {
        Some(subset.iter().map(|t| qualify(t)).collect())
    }
}
