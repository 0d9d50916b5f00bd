//! Human-readable output for the `goldcopy` commands

use colored::Colorize;
use goldcopy::analyzer::{SchemaDiff, SchemaSnapshot, TableInfo};
use goldcopy::golden::{GoldenStatus, SyncResult};
use goldcopy::server::DatabaseSize;
use goldcopy::{CloneResult, Compatibility, MigrationState, SyncDecision};
use std::fmt::Write;

/// `1536` -> `1.5 KB`
#[must_use]
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes.max(0))
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn verdict(compatibility: Compatibility) -> String {
    let label = compatibility.to_string();
    match compatibility {
        Compatibility::Synced => label.green().to_string(),
        Compatibility::Forward => label.yellow().to_string(),
        Compatibility::Behind | Compatibility::Diverged => label.red().to_string(),
        Compatibility::Unknown => label.dimmed().to_string(),
    }
}

pub fn decision(decision: &SyncDecision) -> String {
    if decision.needs_sync {
        format!("{} {}", "⏳ Sync needed:".yellow(), decision.reason)
    } else {
        format!("{} {}", "✅ Fresh:".green(), decision.reason)
    }
}

pub fn status(status: &GoldenStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n📊 Golden copy for '{}'\n", status.project);
    let _ = writeln!(out, "Database: {}", status.database);
    if !status.exists {
        let _ = writeln!(out, "State: absent (run sync first)");
        let _ = writeln!(out, "{}", decision(&status.decision));
        return out;
    }
    if let Some(size) = status.size_bytes {
        let _ = writeln!(out, "Size: {}", format_bytes(size));
    }
    match &status.last_sync {
        Some(last) => {
            let _ = writeln!(out, "Last sync: {}", last.synced_at.format("%Y-%m-%d %H:%M:%S UTC"));
            let _ = writeln!(out, "Source: {}", last.source_masked);
            let _ = writeln!(out, "Duration: {}ms", last.duration_ms);
            let _ = writeln!(out, "Rows: {} across {} tables", last.total_rows(), last.row_counts.len());
            if !last.excluded_tables.is_empty() {
                let _ = writeln!(out, "Excluded: {}", last.excluded_tables.join(", "));
            }
        }
        None => {
            let _ = writeln!(out, "Last sync: never");
        }
    }
    let _ = writeln!(out, "{}", decision(&status.decision));
    out
}

pub fn list(databases: &[DatabaseSize]) -> String {
    if databases.is_empty() {
        return "No golden copies found\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "\n📦 Golden copies ({}):", databases.len());
    for db in databases {
        let _ = writeln!(out, "  {:<40} {:>10}", db.name, format_bytes(db.size_bytes));
    }
    out
}

pub fn sync_result(result: &SyncResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n✅ Synced {} into {}", result.project, result.database);
    let _ = writeln!(out, "Tables copied: {}", result.row_counts.len());
    let _ = writeln!(out, "Rows (approx.): {}", result.metadata.total_rows());
    if !result.excluded_tables.is_empty() {
        let _ = writeln!(out, "Excluded ({}): {}", result.excluded_tables.len(), result.excluded_tables.join(", "));
    }
    for copy in &result.filtered {
        match (copy.rows, &copy.error) {
            (Some(rows), _) => {
                let _ = writeln!(out, "  ✓ {} ({} rows where {})", copy.table, rows, copy.predicate);
            }
            (None, Some(error)) => {
                let _ = writeln!(out, "  {} {} skipped: {}", "⚠".yellow(), copy.table, error);
            }
            (None, None) => {
                let _ = writeln!(out, "  {} {} skipped", "⚠".yellow(), copy.table);
            }
        }
    }
    if !result.warnings.is_empty() {
        let _ = writeln!(out, "Warnings ({}):", result.warnings.len());
        for warning in &result.warnings {
            let _ = writeln!(out, "  {} {}", "⚠".yellow(), warning);
        }
    }
    let _ = writeln!(out, "Duration: {}ms", result.duration_ms);
    out
}

pub fn clone_result(result: &CloneResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n✅ Created workspace database {}", result.database_name);
    let _ = writeln!(out, "DATABASE_URL={}", result.masked_connection_string);
    if let Some(state) = &result.migration_state {
        let _ = writeln!(out, "Migrations: {}", verdict(state.compatibility));
    }
    if let Some(action) = &result.recommended_action {
        let _ = writeln!(out, "Next: {}", action);
    }
    for warning in &result.warnings {
        let _ = writeln!(out, "  {} {}", "⚠".yellow(), warning);
    }
    out
}

fn name_list(out: &mut String, title: &str, names: &[String]) {
    if names.is_empty() {
        return;
    }
    let _ = writeln!(out, "{} ({}):", title, names.len());
    for name in names {
        let _ = writeln!(out, "  {}", name);
    }
}

pub fn migration_state(database: &str, state: &MigrationState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n📊 Migration status for {}\n", database);
    let _ = writeln!(out, "Compatibility: {}", verdict(state.compatibility));
    let _ = writeln!(
        out,
        "Applied: {}, on disk: {}",
        state.applied.len(),
        state.on_disk.len()
    );
    name_list(&mut out, "⏳ Pending", &state.pending);
    name_list(&mut out, "➕ Extra", &state.extra);
    name_list(&mut out, "✏️  Divergent", &state.divergent);
    let _ = writeln!(out, "\nNext: {}", state.recommended_action);
    out
}

pub fn analysis(
    tables: &[TableInfo],
    suggested: &[String],
    warnings: &[String],
    snapshot: &SchemaSnapshot,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n🔎 Source tables ({}):", tables.len());
    let _ = writeln!(out, "  {:<48} {:>10} {:>12}  flags", "table", "size", "rows");
    for table in tables {
        let mut flags = Vec::new();
        if table.is_likely_audit {
            flags.push("audit?");
        }
        if !table.has_indexes {
            flags.push("no-index");
        }
        let _ = writeln!(
            out,
            "  {:<48} {:>10} {:>12}  {}",
            table.qualified_name(),
            format_bytes(table.size_bytes),
            table.row_count,
            flags.join(",")
        );
    }
    if suggested.is_empty() {
        let _ = writeln!(out, "\nNo exclusions suggested");
    } else {
        let _ = writeln!(out, "\nSuggested exclusions ({}):", suggested.len());
        for name in suggested {
            let _ = writeln!(out, "  {}", name);
        }
    }
    for warning in warnings {
        let _ = writeln!(out, "{} {}", "⚠".yellow(), warning);
    }
    let columns: usize = snapshot.values().map(|t| t.columns.len()).sum();
    let _ = writeln!(out, "\nSchema: {} tables, {} columns", snapshot.len(), columns);
    out
}

pub fn schema_diff(diff: &SchemaDiff) -> String {
    if diff.is_empty() {
        return "Golden copy schema matches the source\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "\nSchema drift since the last sync:");
    for table in &diff.added_tables {
        let _ = writeln!(out, "  + {}", table);
    }
    for table in &diff.removed_tables {
        let _ = writeln!(out, "  - {}", table);
    }
    for change in &diff.modified_tables {
        let _ = writeln!(
            out,
            "  ~ {} (+{} -{} ~{} columns)",
            change.table,
            change.added_columns.len(),
            change.removed_columns.len(),
            change.changed_columns.len()
        );
    }
    out
}
