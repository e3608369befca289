//! Workflow step definitions, validation, and the resolved step table.
//!
//! A workflow is an ordered list of named steps over the vocabulary
//! {generate, critique, adjudicate, refine}. `loop_to` references are
//! resolved once at load time into an index table, so jumps never resolve
//! names mid-run.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::model::Constraint;

/// Step vocabulary shared by the fixed pipeline and custom workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Generate,
    Critique,
    Adjudicate,
    Refine,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Generate => "generate",
            StepKind::Critique => "critique",
            StepKind::Adjudicate => "adjudicate",
            StepKind::Refine => "refine",
        };
        f.write_str(s)
    }
}

/// How a critique step runs its (constraint × agent) tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All tasks concurrently; dispositions applied post-hoc.
    Parallel,
    /// One task at a time; a HALT disposition stops the pass immediately.
    Serial,
}

/// Which critiques an adjudicate step sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjudicationScope {
    /// All critiques not yet adjudicated.
    Accumulated,
    /// Only the immediately preceding critique step's output.
    Previous,
    /// Every critique collected this iteration, adjudicated or not.
    All,
}

/// How a refinement applies the bill of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefineMode {
    /// Targeted file edits, validated by a change-magnitude check.
    Edit,
    /// Full regeneration from the previous artifact plus feedback.
    Rewrite,
}

/// Ordering of constraints within a critique step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintOrder {
    /// Sort by constraint priority (lower value first).
    Priority,
    /// Preserve constraint-load order.
    Definition,
}

/// One step in a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStep {
    #[serde(rename = "step")]
    pub kind: StepKind,
    /// Optional stable name, required as a `loop_to` target.
    pub name: Option<String>,
    /// Agent override for this step.
    pub agent: Option<String>,
    /// Critique execution mode.
    pub execution: ExecutionMode,
    /// Critique constraint ordering.
    pub order: ConstraintOrder,
    /// Glob patterns filtering constraint ids; `None` selects all.
    pub constraints: Option<Vec<String>>,
    /// Adjudication scope.
    pub scope: AdjudicationScope,
    /// Refine mode.
    pub mode: RefineMode,
    /// Named earlier step to jump back to after a refine step.
    pub loop_to: Option<String>,
}

impl Default for WorkflowStep {
    fn default() -> Self {
        Self {
            kind: StepKind::Generate,
            name: None,
            agent: None,
            execution: ExecutionMode::Parallel,
            order: ConstraintOrder::Priority,
            constraints: None,
            scope: AdjudicationScope::Accumulated,
            mode: RefineMode::Edit,
            loop_to: None,
        }
    }
}

impl WorkflowStep {
    pub fn generate() -> Self {
        Self::default()
    }

    pub fn critique() -> Self {
        Self {
            kind: StepKind::Critique,
            ..Self::default()
        }
    }

    pub fn adjudicate() -> Self {
        Self {
            kind: StepKind::Adjudicate,
            ..Self::default()
        }
    }
}

/// A validated workflow: the step arena plus a per-step loop-target index.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    steps: Vec<WorkflowStep>,
    /// `loop_targets[i]` is the resolved index of step i's `loop_to`.
    loop_targets: Vec<Option<usize>>,
}

impl Workflow {
    /// Validate `steps` and resolve `loop_to` names into indices.
    pub fn new(steps: Vec<WorkflowStep>) -> Result<Self, Vec<String>> {
        let errors = validate_steps(&steps);
        if !errors.is_empty() {
            return Err(errors);
        }
        let loop_targets = steps
            .iter()
            .map(|s| {
                s.loop_to
                    .as_ref()
                    .and_then(|target| steps.iter().position(|c| c.name.as_deref() == Some(target)))
            })
            .collect();
        Ok(Self { steps, loop_targets })
    }

    /// The fixed generate → critique → adjudicate pipeline. Refinement is
    /// the generate step re-entered on later iterations with the active
    /// adjudication applied.
    pub fn fixed_pipeline() -> Self {
        Self::new(vec![
            WorkflowStep {
                name: Some("generate".to_string()),
                ..WorkflowStep::generate()
            },
            WorkflowStep {
                name: Some("critique".to_string()),
                ..WorkflowStep::critique()
            },
            WorkflowStep {
                name: Some("adjudicate".to_string()),
                ..WorkflowStep::adjudicate()
            },
        ])
        .expect("fixed pipeline definition is valid")
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Resolved jump target for step `index`, if it declares one.
    pub fn loop_target(&self, index: usize) -> Option<usize> {
        self.loop_targets.get(index).copied().flatten()
    }

    /// Display/bookkeeping name for step `index`: the declared name, else
    /// `<kind>-<index>`.
    pub fn step_name(&self, index: usize) -> String {
        match self.steps.get(index) {
            Some(step) => step
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{index}", step.kind)),
            None => format!("step-{index}"),
        }
    }

    /// Index of the critique step immediately preceding `index`, if any.
    pub fn previous_critique(&self, index: usize) -> Option<usize> {
        self.steps[..index]
            .iter()
            .rposition(|s| s.kind == StepKind::Critique)
    }
}

/// Structural validation of a step list. Unknown scope/execution/mode tags
/// are rejected earlier, at serde decode time, by the closed enums.
pub fn validate_steps(steps: &[WorkflowStep]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen_names: Vec<&str> = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        if let Some(name) = &step.name {
            if seen_names.contains(&name.as_str()) {
                errors.push(format!("step {i}: duplicate name '{name}'"));
            }
            seen_names.push(name);
        }

        if let Some(target) = &step.loop_to {
            if step.kind != StepKind::Refine {
                errors.push(format!("step {i}: loop_to is only valid on refine steps"));
            }
            if !steps.iter().any(|s| s.name.as_deref() == Some(target)) {
                errors.push(format!(
                    "step {i}: loop_to references non-existent step '{target}'"
                ));
            }
        }
    }

    if !steps.iter().any(|s| s.kind == StepKind::Generate) {
        errors.push("workflow must have at least one generate step".to_string());
    }

    errors
}

/// Resolve which constraints a critique step evaluates.
///
/// `None` patterns select all constraints; otherwise a constraint is
/// selected when any glob pattern matches its id. Priority ordering sorts
/// by (priority, id); definition ordering preserves load order.
pub fn constraints_for_step<'a>(
    step: &WorkflowStep,
    all: &'a [Constraint],
) -> Vec<&'a Constraint> {
    let mut selected: Vec<&Constraint> = match &step.constraints {
        None => all.iter().collect(),
        Some(patterns) => all
            .iter()
            .filter(|c| {
                patterns.iter().any(|p| match Pattern::new(p) {
                    Ok(pattern) => pattern.matches(&c.id),
                    Err(err) => {
                        warn!(pattern = %p, err = %err, "invalid constraint pattern, skipping");
                        false
                    }
                })
            })
            .collect(),
    };
    if step.order == ConstraintOrder::Priority {
        selected.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(kind: StepKind, name: &str) -> WorkflowStep {
        WorkflowStep {
            kind,
            name: Some(name.to_string()),
            ..WorkflowStep::default()
        }
    }

    #[test]
    fn fixed_pipeline_is_generate_critique_adjudicate() {
        let wf = Workflow::fixed_pipeline();
        let kinds: Vec<StepKind> = wf.steps().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Generate, StepKind::Critique, StepKind::Adjudicate]
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let steps = vec![
            named(StepKind::Generate, "draft"),
            named(StepKind::Critique, "draft"),
        ];
        let errors = validate_steps(&steps);
        assert!(errors.iter().any(|e| e.contains("duplicate name")));
    }

    #[test]
    fn loop_to_must_target_existing_step() {
        let steps = vec![
            named(StepKind::Generate, "draft"),
            WorkflowStep {
                kind: StepKind::Refine,
                loop_to: Some("missing".to_string()),
                ..WorkflowStep::default()
            },
        ];
        let errors = validate_steps(&steps);
        assert!(errors.iter().any(|e| e.contains("non-existent step")));
    }

    #[test]
    fn loop_to_is_rejected_on_non_refine_steps() {
        let steps = vec![
            named(StepKind::Generate, "draft"),
            WorkflowStep {
                kind: StepKind::Critique,
                loop_to: Some("draft".to_string()),
                ..WorkflowStep::default()
            },
        ];
        let errors = validate_steps(&steps);
        assert!(errors.iter().any(|e| e.contains("only valid on refine")));
    }

    #[test]
    fn workflow_without_generate_is_rejected() {
        let steps = vec![named(StepKind::Critique, "review")];
        let errors = validate_steps(&steps);
        assert!(errors.iter().any(|e| e.contains("at least one generate")));
    }

    #[test]
    fn loop_targets_resolve_to_indices_at_load_time() {
        let steps = vec![
            named(StepKind::Generate, "draft"),
            named(StepKind::Critique, "review"),
            named(StepKind::Adjudicate, "judge"),
            WorkflowStep {
                kind: StepKind::Refine,
                name: Some("fix".to_string()),
                loop_to: Some("review".to_string()),
                ..WorkflowStep::default()
            },
        ];
        let wf = Workflow::new(steps).expect("valid workflow");
        assert_eq!(wf.loop_target(3), Some(1));
        assert_eq!(wf.loop_target(0), None);
    }

    #[test]
    fn unknown_step_tag_fails_decoding() {
        let result: Result<WorkflowStep, _> = toml::from_str("step = \"ponder\"");
        assert!(result.is_err());
    }

    #[test]
    fn constraint_filter_selects_by_glob_and_sorts_by_priority() {
        let all = vec![
            Constraint {
                id: "tone-style".to_string(),
                priority: 5,
                ..Constraint::default()
            },
            Constraint {
                id: "tone-voice".to_string(),
                priority: 1,
                ..Constraint::default()
            },
            Constraint {
                id: "safety".to_string(),
                priority: 1,
                ..Constraint::default()
            },
        ];
        let step = WorkflowStep {
            kind: StepKind::Critique,
            constraints: Some(vec!["tone-*".to_string()]),
            ..WorkflowStep::default()
        };
        let selected = constraints_for_step(&step, &all);
        let ids: Vec<&str> = selected.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["tone-voice", "tone-style"]);
    }

    #[test]
    fn previous_critique_finds_nearest_earlier_step() {
        let wf = Workflow::new(vec![
            named(StepKind::Generate, "draft"),
            named(StepKind::Critique, "review-a"),
            named(StepKind::Critique, "review-b"),
            named(StepKind::Adjudicate, "judge"),
        ])
        .expect("valid workflow");
        assert_eq!(wf.previous_critique(3), Some(2));
        assert_eq!(wf.previous_critique(1), None);
    }
}
