//! Severity-to-disposition resolution for critique issues.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::model::{Constraint, DispositionOverrides};
use crate::core::types::{Disposition, Severity};

/// Total disposition table: every severity maps to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispositionTable {
    pub critical: Disposition,
    pub high: Disposition,
    pub medium: Disposition,
    pub low: Disposition,
}

impl Default for DispositionTable {
    fn default() -> Self {
        Self {
            critical: Disposition::Halt,
            high: Disposition::Halt,
            medium: Disposition::Continue,
            low: Disposition::Ignore,
        }
    }
}

impl DispositionTable {
    pub fn get(&self, severity: Severity) -> Disposition {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Resolve the disposition for an issue of `severity` found under
/// `constraint`.
///
/// Resolution order: the constraint's own override, then a per-constraint
/// configuration override, then the configured default table (which itself
/// defaults to CRITICAL→HALT, HIGH→HALT, MEDIUM→CONTINUE, LOW→IGNORE).
pub fn disposition_for(
    constraint: &Constraint,
    severity: Severity,
    config_overrides: &BTreeMap<String, DispositionOverrides>,
    default_table: &DispositionTable,
) -> Disposition {
    if let Some(overrides) = &constraint.dispositions
        && let Some(d) = overrides.get(severity)
    {
        debug!(constraint = %constraint.id, %severity, ?d, "constraint disposition override");
        return d;
    }
    if let Some(overrides) = config_overrides.get(&constraint.id)
        && let Some(d) = overrides.get(severity)
    {
        debug!(constraint = %constraint.id, %severity, ?d, "config disposition override");
        return d;
    }
    default_table.get(severity)
}
