//! Migration compatibility between a workspace database and a checkout

use crate::executor::SqlExecutor;
use crate::migration::{applied_migrations, discover_migrations, AppliedMigration, MigrationError, MigrationFile};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// How a database's migration history relates to the migrations on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    /// Applied and on-disk migrations match
    Synced,
    /// Disk has migrations the database has not applied yet
    Forward,
    /// Database has migrations the checkout does not know about
    Behind,
    /// Histories disagree: edited scripts, or both sides have unique migrations
    Diverged,
    /// Not enough information to decide
    Unknown,
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compatibility::Synced => "synced",
            Compatibility::Forward => "forward",
            Compatibility::Behind => "behind",
            Compatibility::Diverged => "diverged",
            Compatibility::Unknown => "unknown",
        })
    }
}

/// Verdict plus the name sets that justify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    pub compatibility: Compatibility,
    pub applied: Vec<String>,
    pub on_disk: Vec<String>,
    /// On disk, not applied
    pub pending: Vec<String>,
    /// Applied, not on disk
    pub extra: Vec<String>,
    /// On both sides with different script checksums
    pub divergent: Vec<String>,
    pub recommended_action: String,
}

impl MigrationState {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.compatibility == Compatibility::Synced
    }
}

/// Classify from the derived sets, highest priority first.
#[must_use]
pub fn classify(pending: &[String], extra: &[String], divergent: &[String]) -> Compatibility {
    if !divergent.is_empty() || (!extra.is_empty() && !pending.is_empty()) {
        Compatibility::Diverged
    } else if !extra.is_empty() {
        Compatibility::Behind
    } else if !pending.is_empty() {
        Compatibility::Forward
    } else {
        Compatibility::Synced
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Next step for a verdict.
#[must_use]
pub fn recommended_action(
    compatibility: Compatibility,
    pending: &[String],
    extra: &[String],
    divergent: &[String],
) -> String {
    match compatibility {
        Compatibility::Synced => "No action needed; database matches the migrations on disk".to_string(),
        Compatibility::Forward => format!(
            "Apply {} (e.g. `prisma migrate deploy`)",
            plural(pending.len(), "pending migration")
        ),
        Compatibility::Behind => format!(
            "Database has {} not in this checkout; rebase the branch or use reinit to re-clone from the golden copy",
            plural(extra.len(), "extra migration")
        ),
        Compatibility::Diverged if !divergent.is_empty() => format!(
            "{} changed after being applied ({}); use reinit to re-clone from the golden copy",
            plural(divergent.len(), "migration"),
            divergent.join(", ")
        ),
        Compatibility::Diverged => format!(
            "Database and checkout disagree ({} pending, {} extra); use reinit to re-clone from the golden copy",
            pending.len(),
            extra.len()
        ),
        Compatibility::Unknown => "Capture baselines on both sides, then compare again".to_string(),
    }
}

/// Compare applied migrations against on-disk migrations.
///
/// A present migration without a computable checksum counts as divergent.
#[must_use]
pub fn compute_state(applied: &[AppliedMigration], on_disk: &[MigrationFile]) -> MigrationState {
    let applied_by_name: BTreeMap<&str, &AppliedMigration> = applied
        .iter()
        .map(|m| (m.migration_name.as_str(), m))
        .collect();
    let disk_names: BTreeSet<&str> = on_disk.iter().map(|m| m.name.as_str()).collect();

    let mut pending = Vec::new();
    let mut divergent = Vec::new();
    for file in on_disk {
        match applied_by_name.get(file.name.as_str()) {
            None => pending.push(file.name.clone()),
            Some(record) => {
                if file.checksum.as_deref() != Some(record.checksum.as_str()) {
                    divergent.push(file.name.clone());
                }
            }
        }
    }

    let extra: Vec<String> = applied
        .iter()
        .filter(|m| !disk_names.contains(m.migration_name.as_str()))
        .map(|m| m.migration_name.clone())
        .collect();

    let compatibility = classify(&pending, &extra, &divergent);
    let recommended_action = recommended_action(compatibility, &pending, &extra, &divergent);

    MigrationState {
        compatibility,
        applied: applied.iter().map(|m| m.migration_name.clone()).collect(),
        on_disk: on_disk.iter().map(|m| m.name.clone()).collect(),
        pending,
        extra,
        divergent,
        recommended_action,
    }
}

/// Read both sides and compute the state.
///
/// # Errors
///
/// Returns `MigrationError` if the ledger or the migrations directory cannot be read.
pub fn detect(executor: &dyn SqlExecutor, migrations_dir: &Path) -> Result<MigrationState, MigrationError> {
    let on_disk = discover_migrations(migrations_dir)?;
    let applied = applied_migrations(executor)?;
    let state = compute_state(&applied, &on_disk);
    log::debug!(
        "migration state {}: {} applied, {} on disk, {} pending, {} extra, {} divergent",
        state.compatibility,
        state.applied.len(),
        state.on_disk.len(),
        state.pending.len(),
        state.extra.len(),
        state.divergent.len()
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{checksum_bytes, MIGRATION_SCRIPT};
    use std::fs;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sql(name: &str) -> String {
        format!("-- {name}\nCREATE TABLE {name} (id int);\n")
    }

    fn applied(list: &[&str]) -> Vec<AppliedMigration> {
        list.iter()
            .enumerate()
            .map(|(i, name)| AppliedMigration {
                id: format!("id-{i}"),
                migration_name: name.to_string(),
                checksum: checksum_bytes(sql(name).as_bytes()),
                finished_at: None,
                rolled_back_at: None,
            })
            .collect()
    }

    fn write_disk(root: &Path, list: &[&str]) {
        for name in list {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(MIGRATION_SCRIPT), sql(name)).unwrap();
        }
    }

    #[test]
    fn test_classification_table() {
        let empty: Vec<String> = Vec::new();
        let one = names(&["c"]);
        let cases: Vec<(&Vec<String>, &Vec<String>, &Vec<String>, Compatibility)> = vec![
            (&empty, &empty, &empty, Compatibility::Synced),
            (&one, &empty, &empty, Compatibility::Forward),
            (&empty, &one, &empty, Compatibility::Behind),
            (&empty, &empty, &one, Compatibility::Diverged),
            (&one, &one, &empty, Compatibility::Diverged),
            (&one, &empty, &one, Compatibility::Diverged),
        ];
        for (pending, extra, divergent, expected) in cases {
            assert_eq!(classify(pending, extra, divergent), expected);
        }
    }

    #[test]
    fn test_single_pending_action_wording() {
        let pending = names(&["20240301_add_c"]);
        let action = recommended_action(Compatibility::Forward, &pending, &[], &[]);
        assert!(action.contains("1 pending migration"));
        assert!(!action.contains("migrations"));
    }

    #[test]
    fn test_behind_and_diverged_point_to_reinit() {
        let one = names(&["x"]);
        assert!(recommended_action(Compatibility::Behind, &[], &one, &[]).contains("reinit"));
        assert!(recommended_action(Compatibility::Diverged, &[], &[], &one).contains("reinit"));
        assert!(recommended_action(Compatibility::Diverged, &one, &one, &[]).contains("reinit"));
    }

    #[test]
    fn test_scenario_forward() {
        let root = tempfile::tempdir().unwrap();
        write_disk(root.path(), &["a", "b", "c"]);
        let state = compute_state(&applied(&["a", "b"]), &discover_migrations(root.path()).unwrap());
        assert_eq!(state.pending, names(&["c"]));
        assert!(state.extra.is_empty());
        assert_eq!(state.compatibility, Compatibility::Forward);
        assert!(state.recommended_action.contains("1 pending migration"));
    }

    #[test]
    fn test_scenario_behind() {
        let root = tempfile::tempdir().unwrap();
        write_disk(root.path(), &["a", "b"]);
        let state = compute_state(&applied(&["a", "b", "c"]), &discover_migrations(root.path()).unwrap());
        assert_eq!(state.extra, names(&["c"]));
        assert_eq!(state.compatibility, Compatibility::Behind);
    }

    #[test]
    fn test_scenario_diverged_edit_wins_over_pending() {
        let root = tempfile::tempdir().unwrap();
        write_disk(root.path(), &["a", "b", "c"]);
        fs::write(root.path().join("b").join(MIGRATION_SCRIPT), "-- edited\n").unwrap();
        let state = compute_state(&applied(&["a", "b"]), &discover_migrations(root.path()).unwrap());
        assert_eq!(state.divergent, names(&["b"]));
        assert_eq!(state.pending, names(&["c"]));
        assert_eq!(state.compatibility, Compatibility::Diverged);
    }

    #[test]
    fn test_unreadable_checksum_counts_as_divergent() {
        let on_disk = vec![MigrationFile {
            name: "a".into(),
            path: "a/migration.sql".into(),
            checksum: None,
        }];
        let state = compute_state(&applied(&["a"]), &on_disk);
        assert_eq!(state.divergent, names(&["a"]));
        assert_eq!(state.compatibility, Compatibility::Diverged);
    }

    #[test]
    fn test_synced_when_identical() {
        let root = tempfile::tempdir().unwrap();
        write_disk(root.path(), &["a", "b"]);
        let state = compute_state(&applied(&["a", "b"]), &discover_migrations(root.path()).unwrap());
        assert!(state.is_synced());
        assert_eq!(state.applied, state.on_disk);
    }
}
