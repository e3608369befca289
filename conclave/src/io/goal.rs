//! Goal and source-material loading for a run.
//!
//! The goal contract is deliberately thin: `goal.md` holds the objective,
//! `source.md` (optional) holds pre-resolved source material. Richer
//! resolution (globs, scripts, variable substitution) belongs to an
//! external preparation step that writes these files before the run.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::paths::RunPaths;
use crate::io::store::{read_text_or_empty, write_text_atomic};

/// Loaded goal plus resolved source material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedGoal {
    pub goal_text: String,
    pub source: String,
}

/// Load the goal for a run. `None` when no goal file exists or it is empty.
pub fn load_goal(paths: &RunPaths) -> Option<LoadedGoal> {
    if !paths.goal_path.exists() {
        return None;
    }
    let goal_text = read_text_or_empty(&paths.goal_path).trim().to_string();
    if goal_text.is_empty() {
        return None;
    }
    let source = read_text_or_empty(&paths.source_path).trim().to_string();
    debug!(goal_bytes = goal_text.len(), source_bytes = source.len(), "goal loaded");
    Some(LoadedGoal { goal_text, source })
}

const GOAL_TEMPLATE: &str = "\
# Goal

Describe your objective here.

What should the agents generate or accomplish?

<!--
Optional: put pre-resolved source material in source.md next to this file,
and constraint files under constraints/.
-->
";

/// Create a template `goal.md` for the user to edit.
pub fn create_goal_template(paths: &RunPaths) -> Result<&Path> {
    write_text_atomic(&paths.goal_path, GOAL_TEMPLATE)
        .with_context(|| format!("write {}", paths.goal_path.display()))?;
    Ok(&paths.goal_path)
}
