//! Constraint loading from `constraints/*.toml`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::model::Constraint;
use crate::io::store::write_text_atomic;

/// Load all constraints from `dir`, sorted by (priority, id).
///
/// A missing directory is not an error — the run proceeds without
/// constraint enforcement (logged). A malformed constraint file is a
/// configuration error and fails the load.
pub fn load_constraints(dir: &Path) -> Result<Vec<Constraint>> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "no constraints directory, running without constraint enforcement");
        return Ok(Vec::new());
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("read constraints dir {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();

    let mut constraints = Vec::new();
    for path in files {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("read constraint {}", path.display()))?;
        let mut constraint: Constraint = toml::from_str(&contents)
            .with_context(|| format!("parse constraint {}", path.display()))?;
        if constraint.id.is_empty() {
            // File stem is the fallback id, as for human-named rule files.
            constraint.id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        validate_constraint(&constraint, &path)?;
        debug!(id = %constraint.id, priority = constraint.priority, rules = constraint.rules.len(),
               "constraint loaded");
        constraints.push(constraint);
    }

    constraints.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    Ok(constraints)
}

fn validate_constraint(constraint: &Constraint, path: &Path) -> Result<()> {
    if constraint.id.trim().is_empty() {
        return Err(anyhow!("constraint {} has an empty id", path.display()));
    }
    for rule in &constraint.rules {
        if rule.id.trim().is_empty() {
            return Err(anyhow!(
                "constraint '{}' has a rule with an empty id",
                constraint.id
            ));
        }
    }
    if let Some(agents) = &constraint.agents
        && agents.is_empty()
    {
        return Err(anyhow!(
            "constraint '{}' declares an empty agents list",
            constraint.id
        ));
    }
    Ok(())
}

/// Digest of all constraints for generator prompts: id, priority, summary.
pub fn compress_constraints(constraints: &[Constraint]) -> String {
    let mut sections = Vec::new();
    for constraint in constraints {
        sections.push(format!(
            "## {} (priority {})\n{}",
            constraint.id,
            constraint.priority,
            constraint.summary.trim()
        ));
    }
    sections.join("\n\n")
}

/// Persist the compressed digest next to the run for inspection.
pub fn save_compressed_constraints(run_dir: &Path, compressed: &str) -> Result<()> {
    let path = run_dir.join("constraints_compressed.md");
    write_text_atomic(&path, compressed)
}
