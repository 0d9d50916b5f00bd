//! Dependency ordering for data loading
//!
//! Row-filtered tables are copied after the bulk restore, one at a time. Their
//! foreign keys are already in place by then, so parents must be loaded before
//! the children that reference them.

use crate::analyzer::ForeignKeyInfo;
use std::collections::{BTreeMap, BTreeSet};

/// Orders `tables` so that every foreign-key parent comes before its children.
///
/// Edges to tables outside the set and self-references are ignored. Ties are
/// broken lexicographically, so the result is deterministic. Tables caught in
/// a cycle are appended in lexicographic order instead of failing.
#[must_use]
pub fn order_tables(tables: &[String], foreign_keys: &[ForeignKeyInfo]) -> Vec<String> {
    let edges: Vec<(String, String)> = foreign_keys
        .iter()
        .map(|fk| (fk.referenced_table_qualified(), fk.table_qualified()))
        .collect();
    topological_sort(tables, &edges)
}

/// Kahn's algorithm over `(parent, child)` edges.
#[must_use]
pub fn topological_sort(nodes: &[String], edges: &[(String, String)]) -> Vec<String> {
    let node_set: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();

    // Multi-column keys produce one edge per column; count each pair once.
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = node_set.iter().map(|n| (*n, 0)).collect();

    for (parent, child) in edges {
        let (parent, child) = (parent.as_str(), child.as_str());
        if parent == child || !node_set.contains(parent) || !node_set.contains(child) {
            continue;
        }
        if dependents.entry(parent).or_default().insert(child) {
            if let Some(degree) = in_degree.get_mut(&child) {
                *degree += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut ordered: Vec<String> = Vec::with_capacity(node_set.len());

    while let Some(current) = ready.pop_first() {
        ordered.push(current.to_string());
        in_degree.remove(&current);

        if let Some(children) = dependents.get(&current) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if !in_degree.is_empty() {
        log::warn!(
            "circular foreign key dependency among {}; loading them in name order",
            in_degree.keys().copied().collect::<Vec<_>>().join(", ")
        );
        // BTreeMap iteration is already lexicographic.
        ordered.extend(in_degree.keys().map(|n| n.to_string()));
    }

    ordered
}
