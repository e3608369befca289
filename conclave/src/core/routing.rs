//! Constraint-to-agent routing resolution.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::model::Constraint;

/// Pattern-based routing rule: constraint ids matching `pattern` (glob) go
/// to `agents`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRule {
    pub pattern: String,
    pub agents: Vec<String>,
}

/// Priority-range routing rule: constraints with priority in
/// `[min, max]` (inclusive) go to `agents`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityRule {
    pub min: i64,
    pub max: i64,
    pub agents: Vec<String>,
}

/// Routing configuration for critique fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Fallback agent set when no rule matches. Empty means "all available".
    pub default_agents: Vec<String>,
    pub rules: Vec<RoutingRule>,
    pub priority_rules: Vec<PriorityRule>,
}

/// Resolve which agents critique `constraint`.
///
/// Resolution order: per-constraint agent list, then the first matching
/// glob rule, then the first matching priority-range rule, then the
/// configured default set, then all of `available`. The result is filtered
/// to agents actually available; removed entries are logged.
pub fn agents_for_constraint(
    constraint: &Constraint,
    routing: &RoutingConfig,
    available: &[String],
) -> Vec<String> {
    let selected: Vec<String> = if let Some(agents) = &constraint.agents {
        debug!(constraint = %constraint.id, ?agents, "per-constraint agent override");
        agents.clone()
    } else if let Some(rule) = routing
        .rules
        .iter()
        .find(|r| pattern_matches(&r.pattern, &constraint.id))
    {
        debug!(constraint = %constraint.id, pattern = %rule.pattern, "matched routing rule");
        rule.agents.clone()
    } else if let Some(rule) = routing
        .priority_rules
        .iter()
        .find(|r| r.min <= constraint.priority && constraint.priority <= r.max)
    {
        debug!(constraint = %constraint.id, min = rule.min, max = rule.max, "matched priority rule");
        rule.agents.clone()
    } else if !routing.default_agents.is_empty() {
        routing.default_agents.clone()
    } else {
        available.to_vec()
    };

    let filtered: Vec<String> = selected
        .iter()
        .filter(|a| available.contains(a))
        .cloned()
        .collect();
    if filtered.len() != selected.len() {
        let removed: Vec<&String> = selected.iter().filter(|a| !available.contains(a)).collect();
        warn!(constraint = %constraint.id, ?removed, "removed unavailable agents from routing");
    }
    filtered
}

fn pattern_matches(pattern: &str, id: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(id),
        Err(err) => {
            warn!(pattern, err = %err, "invalid routing pattern, skipping");
            false
        }
    }
}
