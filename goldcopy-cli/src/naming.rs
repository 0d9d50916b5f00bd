//! Workspace database naming

use goldcopy::connection::DEFAULT_NAME_PATTERN;
use goldcopy::{generate_database_name, ProjectConfig};

/// Database name for a workspace of `project`.
///
/// With a worktree and a pattern that has no `{worktree}` token, the worktree
/// is appended so that two worktrees never share a database.
#[must_use]
pub fn workspace_database_name(project: &ProjectConfig, worktree: Option<&str>) -> String {
    let pattern = match project.source.database_name_pattern.trim() {
        "" => DEFAULT_NAME_PATTERN,
        p => p,
    };
    let pattern = match worktree {
        Some(_) if !pattern.contains("{worktree}") => format!("{}-{{worktree}}", pattern),
        _ => pattern.to_string(),
    };
    generate_database_name(&project.name, project.port, worktree, &pattern)
}
