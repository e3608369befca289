//! Unified workflow engine.
//!
//! One step executor runs both the fixed generate → critique → adjudicate
//! pipeline (expressed as the default workflow definition) and custom
//! workflows from configuration. A generate step that already has an
//! adjudication on record is a refinement pass; refine steps with `loop_to`
//! jump back to an earlier step and clear accumulated critique state. The
//! checkpoint is committed after every externally observable transition, so
//! a crash resumes at the last committed step (the step in flight at crash
//! time is re-issued from scratch).
//!
//! The iteration budget is granted per invocation: a resumed run gets
//! `max_iterations` more iterations from wherever its checkpoint left off,
//! which is what lets a human answer un-stick a budget escalation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::disposition::disposition_for;
use crate::core::model::{Adjudication, Agent, Constraint, Critique, CritiqueIssue};
use crate::core::parse::{parse_adjudication, parse_critique};
use crate::core::routing::agents_for_constraint;
use crate::core::thrash::ThrashTracker;
use crate::core::types::{
    AdjudicationVerdict, CritiqueVerdict, DecisionStatus, Disposition, Severity,
};
use crate::core::workflow::{
    AdjudicationScope, ExecutionMode, RefineMode, StepKind, Workflow, WorkflowStep,
    constraints_for_step,
};
use crate::io::config::{EscalationTrigger, OrchestratorConfig};
use crate::io::constraints::{compress_constraints, save_compressed_constraints};
use crate::io::hitl::AgentQuestions;
use crate::io::invoke::{InvokeOutput, InvokeRequest, run_batch};
use crate::io::prompt;
use crate::io::state::{RunState, write_state};
use crate::io::store::{read_text_or_empty, write_json_atomic, write_text_atomic};
use crate::io::thread::{ThreadEntry, append_thread};
use crate::session::{RunOutcome, SessionCtx, escalate_to_human};

/// Execute workflow steps until the run completes, escalates, or runs out
/// of iteration budget.
pub fn run_workflow(
    ctx: &SessionCtx<'_>,
    constraints: &[Constraint],
    workflow: &Workflow,
    mut state: RunState,
) -> Result<RunOutcome> {
    let compressed = compress_constraints(constraints);
    if !compressed.is_empty() {
        save_compressed_constraints(&ctx.paths.run_dir, &compressed)?;
    }
    let last_iteration = state.iteration + ctx.config.max_iterations - 1;

    loop {
        if state.iteration > last_iteration {
            return budget_exhausted(ctx, &mut state);
        }
        let Some(step) = workflow.steps().get(state.step_index) else {
            // Step list exhausted without approval: next iteration from the top.
            state.step_index = 0;
            state.iteration += 1;
            state.critiques_by_step.clear();
            state.unadjudicated.clear();
            write_state(&ctx.paths.state_path, &state)?;
            continue;
        };
        let idx = state.step_index;
        let name = workflow.step_name(idx);
        debug!(iteration = state.iteration, step = %name, kind = %step.kind, "executing step");

        let outcome = match step.kind {
            StepKind::Generate => generate_step(ctx, &compressed, &mut state, step, idx)?,
            StepKind::Critique => critique_step(ctx, constraints, &mut state, step, idx, &name)?,
            StepKind::Adjudicate => {
                adjudicate_step(ctx, constraints, workflow, &mut state, step, idx)?
            }
            StepKind::Refine => {
                refine_step(ctx, &compressed, workflow, &mut state, step, idx, &name)?
            }
        };
        if let Some(outcome) = outcome {
            return Ok(outcome);
        }
    }
}

/// Result of one refinement attempt.
enum Refined {
    Ok(String),
    /// Validation failed below the retry limit; re-run the step.
    Retry,
    Escalated(RunOutcome),
}

fn generate_step(
    ctx: &SessionCtx<'_>,
    compressed: &str,
    state: &mut RunState,
    step: &WorkflowStep,
    idx: usize,
) -> Result<Option<RunOutcome>> {
    let agent = step_agent(ctx, step, ctx.config.generate_agent()?)?;
    let refining = state.last_adjudication.is_some() && state.artifact.is_some();

    let artifact = if refining && ctx.config.refine.mode == RefineMode::Edit {
        match edit_refinement(ctx, state, &agent)? {
            Refined::Ok(text) => text,
            Refined::Retry => return Ok(None),
            Refined::Escalated(outcome) => return Ok(Some(outcome)),
        }
    } else {
        match rewrite_pass(ctx, compressed, state, &agent, refining)? {
            Refined::Ok(text) => text,
            Refined::Retry => return Ok(None),
            Refined::Escalated(outcome) => return Ok(Some(outcome)),
        }
    };

    record_artifact(ctx, state, &agent.name, "generate", artifact)?;
    state.step_index = idx + 1;
    write_state(&ctx.paths.state_path, state)?;
    Ok(None)
}

/// Initial generation, or full-rewrite refinement when an adjudication is
/// on record.
fn rewrite_pass(
    ctx: &SessionCtx<'_>,
    compressed: &str,
    state: &mut RunState,
    agent: &Agent,
    refining: bool,
) -> Result<Refined> {
    let adjudication = state.last_adjudication.clone();
    let mut prompt_text = prompt::generator_prompt(
        &ctx.goal.goal_text,
        &ctx.goal.source,
        compressed,
        state.artifact.as_deref().filter(|_| refining),
        adjudication.as_ref().filter(|_| refining),
        state.iteration,
    );
    push_human_guidance(&mut prompt_text, ctx);
    ctx.live.banner(&format!(
        "ITERATION {} — {}",
        state.iteration,
        if refining { "REFINE (rewrite)" } else { "GENERATE" }
    ));

    let output = invoke_agent(ctx, agent, prompt_text)?;
    let text = output.stdout.trim().to_string();
    if output.timed_out || output.failed() || text.is_empty() {
        let reason = format!(
            "generator '{}' failed (exit {}): {}",
            agent.name,
            output.exit_code,
            output
                .error
                .clone()
                .unwrap_or_else(|| stderr_excerpt(&output))
        );
        // A failed refinement is retryable; a failed initial generation
        // leaves nothing to fall back to.
        if refining {
            return refinement_failure(ctx, state, &reason);
        }
        return Err(anyhow!(reason));
    }
    if refining && Some(text.as_str()) == state.artifact.as_deref() {
        return refinement_failure(ctx, state, "refinement produced byte-identical output");
    }
    Ok(Refined::Ok(text))
}

/// Targeted-edit refinement: seed the working copy, let the agent edit it
/// in place, read it back, and validate the change magnitude.
fn edit_refinement(ctx: &SessionCtx<'_>, state: &mut RunState, agent: &Agent) -> Result<Refined> {
    let previous = state
        .artifact
        .clone()
        .ok_or_else(|| anyhow!("edit refinement with no artifact on record"))?;
    let adjudication = state
        .last_adjudication
        .clone()
        .ok_or_else(|| anyhow!("edit refinement with no adjudication on record"))?;

    let working_copy = ctx
        .paths
        .iteration_dir(state.iteration)
        .join("artifact.md");
    write_text_atomic(&working_copy, &previous)?;

    let mut prompt_text = prompt::refinement_prompt(
        &working_copy,
        &adjudication,
        &ctx.goal.goal_text,
        state.iteration,
    );
    push_human_guidance(&mut prompt_text, ctx);
    ctx.live
        .banner(&format!("ITERATION {} — REFINE (edit)", state.iteration));

    let output = invoke_agent(ctx, agent, prompt_text)?;
    if output.timed_out || output.failed() {
        return refinement_failure(
            ctx,
            state,
            &format!(
                "refiner '{}' failed (exit {}): {}",
                agent.name,
                output.exit_code,
                output.error.clone().unwrap_or_else(|| stderr_excerpt(&output))
            ),
        );
    }

    let refined = read_text_or_empty(&working_copy);
    if let Err(reason) =
        validate_refinement(&previous, &refined, ctx.config.refine.max_size_change_pct)
    {
        return refinement_failure(ctx, state, &reason);
    }
    Ok(Refined::Ok(refined))
}

/// Count a validation failure toward the retry limit; escalate past it.
fn refinement_failure(ctx: &SessionCtx<'_>, state: &mut RunState, reason: &str) -> Result<Refined> {
    state.validation_retries += 1;
    warn!(retries = state.validation_retries, reason, "refinement validation failed");
    ctx.live.line(&format!(
        "Refinement rejected: {reason} (attempt {})",
        state.validation_retries
    ));
    if state.validation_retries > ctx.config.refine.validation_retries {
        state.validation_retries = 0;
        let groups = vec![AgentQuestions::orchestrator(
            "refinement",
            format!(
                "Refinement keeps failing validation ({reason}). Provide guidance on how to \
                 apply the bill of work, or adjust it."
            ),
            "high",
        )];
        let index = state.iteration;
        return Ok(Refined::Escalated(escalate_to_human(
            ctx, state, groups, index,
        )?));
    }
    write_state(&ctx.paths.state_path, state)?;
    Ok(Refined::Retry)
}

/// Reject refinements that left the artifact unchanged or changed its word
/// count by more than `max_pct` percent.
fn validate_refinement(previous: &str, refined: &str, max_pct: f64) -> Result<(), String> {
    if refined.trim().is_empty() {
        return Err("refined artifact is empty".to_string());
    }
    if refined == previous {
        return Err("refined artifact is byte-identical to the previous version".to_string());
    }
    let before = previous.split_whitespace().count().max(1);
    let after = refined.split_whitespace().count();
    let change = (after as f64 - before as f64).abs() / before as f64 * 100.0;
    if change > max_pct {
        return Err(format!(
            "word count changed by {change:.0}% (limit {max_pct:.0}%)"
        ));
    }
    Ok(())
}

fn critique_step(
    ctx: &SessionCtx<'_>,
    constraints: &[Constraint],
    state: &mut RunState,
    step: &WorkflowStep,
    idx: usize,
    step_name: &str,
) -> Result<Option<RunOutcome>> {
    let artifact = state
        .artifact
        .clone()
        .ok_or_else(|| anyhow!("critique step '{step_name}' has no artifact to review"))?;
    let selected = constraints_for_step(step, constraints);
    if selected.is_empty() {
        debug!(step = step_name, "no constraints selected, skipping critique step");
        state.critiques_by_step.insert(step_name.to_string(), Vec::new());
        state.step_index = idx + 1;
        write_state(&ctx.paths.state_path, state)?;
        return Ok(None);
    }

    let available = ctx.config.critique_agents();
    let mut tasks: Vec<(&Constraint, Agent)> = Vec::new();
    for &constraint in &selected {
        let routed = agents_for_constraint(constraint, &ctx.config.routing, &available);
        if routed.is_empty() {
            warn!(constraint = %constraint.id, "no critique agents routed, skipping constraint");
        }
        for name in routed {
            tasks.push((constraint, agent_named(ctx.agents, &name)?.clone()));
        }
    }
    ctx.live.banner(&format!(
        "ITERATION {} — CRITIQUE ({step_name}, {} task(s))",
        state.iteration,
        tasks.len()
    ));

    let mut collected: Vec<Critique> = Vec::new();
    let mut escalated: Vec<(String, CritiqueIssue)> = Vec::new();
    match step.execution {
        ExecutionMode::Parallel => {
            let requests: Vec<InvokeRequest> = tasks
                .iter()
                .map(|(constraint, agent)| InvokeRequest {
                    agent: agent.clone(),
                    prompt: prompt::critic_prompt(
                        constraint,
                        &artifact,
                        &ctx.goal.goal_text,
                        state.iteration,
                    ),
                    live_prefix: Some(format!("{}[{}]", agent.name, constraint.id)),
                })
                .collect();
            let results = run_batch(ctx.invoker, Some(ctx.live), &requests);
            for ((constraint, agent), result) in tasks.iter().zip(results) {
                let mut critique =
                    critique_from_result(agent, constraint, state.iteration, result);
                let (_, issues) = apply_dispositions(&mut critique, constraint, ctx.config);
                escalated.extend(issues.into_iter().map(|i| (constraint.id.clone(), i)));
                collected.push(critique);
            }
        }
        ExecutionMode::Serial => {
            for (constraint, agent) in &tasks {
                let request = InvokeRequest {
                    agent: agent.clone(),
                    prompt: prompt::critic_prompt(
                        constraint,
                        &artifact,
                        &ctx.goal.goal_text,
                        state.iteration,
                    ),
                    live_prefix: Some(format!("{}[{}]", agent.name, constraint.id)),
                };
                let result = ctx.invoker.invoke(&request, Some(ctx.live));
                let mut critique =
                    critique_from_result(agent, constraint, state.iteration, result);
                let (halt, issues) = apply_dispositions(&mut critique, constraint, ctx.config);
                let escalate_now = !issues.is_empty();
                escalated.extend(issues.into_iter().map(|i| (constraint.id.clone(), i)));
                collected.push(critique);
                if escalate_now {
                    break;
                }
                if halt {
                    warn!(constraint = %constraint.id, "halting critique collection on severe issue");
                    ctx.live.line(&format!(
                        "HALT: severe issue under '{}', moving to adjudication",
                        constraint.id
                    ));
                    break;
                }
            }
        }
    }

    // Persist collected critiques before any control-flow decision.
    let critiques_dir = ctx.paths.critiques_dir(state.iteration);
    for critique in &collected {
        let file = critiques_dir.join(format!(
            "{}__{}.json",
            critique.constraint_id, critique.reviewer
        ));
        write_json_atomic(&file, critique)?;

        let mut entry = ThreadEntry::new(&critique.reviewer, "critic", critique.summary.clone());
        entry.iteration = Some(state.iteration);
        entry.phase = Some("critique".to_string());
        entry.step_name = Some(step_name.to_string());
        entry.constraint = Some(critique.constraint_id.clone());
        entry.overall = Some(critique.overall.to_string());
        entry.issues_count = Some(critique.issues.len());
        append_thread(&ctx.paths.thread_path, &entry)?;
    }

    state
        .critiques_by_step
        .insert(step_name.to_string(), collected.clone());
    state.unadjudicated.extend(collected);

    if !escalated.is_empty() {
        // ESCALATE bypasses adjudication: these issues go straight to a
        // human, the rest of the workflow resumes after the answer.
        let groups: Vec<AgentQuestions> = escalated
            .iter()
            .map(|(constraint_id, issue)| {
                AgentQuestions::orchestrator(
                    &issue.id,
                    format!(
                        "[{constraint_id}] {} issue requires human review: {} (at {})",
                        issue.severity, issue.finding, issue.location
                    ),
                    "critical",
                )
            })
            .collect();
        state.step_index = idx + 1;
        let index = state.iteration;
        return Ok(Some(escalate_to_human(ctx, state, groups, index)?));
    }

    state.step_index = idx + 1;
    write_state(&ctx.paths.state_path, state)?;
    Ok(None)
}

fn adjudicate_step(
    ctx: &SessionCtx<'_>,
    constraints: &[Constraint],
    workflow: &Workflow,
    state: &mut RunState,
    step: &WorkflowStep,
    idx: usize,
) -> Result<Option<RunOutcome>> {
    let scoped: Vec<Critique> = match step.scope {
        AdjudicationScope::Accumulated => state.unadjudicated.clone(),
        AdjudicationScope::Previous => {
            let prev = workflow.previous_critique(idx).ok_or_else(|| {
                anyhow!("adjudicate step with scope=previous has no preceding critique step")
            })?;
            let name = workflow.step_name(prev);
            state.critiques_by_step.get(&name).cloned().unwrap_or_default()
        }
        AdjudicationScope::All => state
            .critiques_by_step
            .values()
            .flatten()
            .cloned()
            .collect(),
    };

    let clean = scoped
        .iter()
        .all(|c| c.issues.is_empty() && c.overall != CritiqueVerdict::Error);
    let adjudication = if clean {
        // Nothing to arbitrate: approve without an agent round trip.
        info!(iteration = state.iteration, "no issues to adjudicate, approving");
        Adjudication {
            iteration: state.iteration,
            verdict: AdjudicationVerdict::Approved,
            ..Adjudication::default()
        }
    } else {
        let agent = step_agent(ctx, step, ctx.config.adjudicate_agent()?)?;
        let constraint_refs: Vec<&Constraint> = constraints.iter().collect();
        let artifact = state.artifact.clone().unwrap_or_default();
        let prompt_text = prompt::adjudicator_prompt(
            &constraint_refs,
            &artifact,
            &scoped,
            &ctx.goal.goal_text,
            state.iteration,
            ctx.config.max_iterations,
        );
        ctx.live
            .banner(&format!("ITERATION {} — ADJUDICATE", state.iteration));

        let output = invoke_agent(ctx, &agent, prompt_text)?;
        if output.timed_out || (output.failed() && output.stdout.trim().is_empty()) {
            Adjudication::error(
                state.iteration,
                output.error.clone().unwrap_or_else(|| stderr_excerpt(&output)),
            )
        } else {
            parse_adjudication(&output.stdout, state.iteration)
        }
    };

    write_json_atomic(
        &ctx.paths.iteration_dir(state.iteration).join("adjudication.json"),
        &adjudication,
    )?;
    let mut entry = ThreadEntry::new(
        "adjudicator",
        "adjudicator",
        if adjudication.bill_of_work.is_empty() {
            format!("verdict: {}", adjudication.verdict)
        } else {
            adjudication.bill_of_work.clone()
        },
    );
    entry.iteration = Some(state.iteration);
    entry.phase = Some("adjudicate".to_string());
    entry.overall = Some(adjudication.verdict.to_string());
    entry.issues_count = Some(adjudication.decisions.len());
    append_thread(&ctx.paths.thread_path, &entry)?;

    // Consume the scoped critiques.
    match step.scope {
        AdjudicationScope::Accumulated | AdjudicationScope::All => state.unadjudicated.clear(),
        AdjudicationScope::Previous => {
            state.unadjudicated.retain(|c| {
                !scoped.iter().any(|s| {
                    s.constraint_id == c.constraint_id
                        && s.reviewer == c.reviewer
                        && s.iteration == c.iteration
                })
            });
        }
    }

    if ctx.config.termination.approval_policy.approves(&adjudication) {
        return Ok(Some(complete(ctx, state, adjudication)?));
    }

    let pursuing = adjudication.pursuing_ids();
    let mut tracker = ThrashTracker::new(
        ctx.config.termination.thrash_threshold,
        std::mem::take(&mut state.issue_thrash_counts),
    );
    let report = tracker.record(&state.last_pursuing, &pursuing);
    state.issue_thrash_counts = tracker.into_counts();
    state.last_pursuing = pursuing;

    // CRITICAL issues the adjudicator marked as locked against a competing
    // constraint cannot be refined away; only a human can pick the winner.
    let conflicting: Vec<String> = adjudication
        .decisions
        .iter()
        .filter(|d| {
            d.status == DecisionStatus::Pursuing
                && d.severity == Severity::Critical
                && d.competing_constraint.is_some()
        })
        .map(|d| d.issue_id.clone())
        .collect();
    state.last_adjudication = Some(adjudication);

    if !conflicting.is_empty()
        && ctx
            .config
            .termination
            .escalate_on
            .contains(&EscalationTrigger::ConflictingCriticals)
    {
        let groups = vec![AgentQuestions::orchestrator(
            "conflicting_criticals",
            format!(
                "CRITICAL issue(s) {} conflict with a competing constraint; no refinement can \
                 satisfy both. Decide which constraint yields.",
                conflicting.join(", ")
            ),
            "critical",
        )];
        state.step_index = idx + 1;
        let index = state.iteration;
        return Ok(Some(escalate_to_human(ctx, state, groups, index)?));
    }

    if report.has_chronic()
        && ctx
            .config
            .termination
            .escalate_on
            .contains(&EscalationTrigger::Thrashing)
    {
        let ids: Vec<String> = report.chronic.iter().map(|(id, _)| id.clone()).collect();
        // Fresh counters after human input, or the same ids escalate again
        // on their next overlap.
        for id in &ids {
            state.issue_thrash_counts.remove(id);
        }
        let groups = vec![AgentQuestions::orchestrator(
            "thrashing",
            format!(
                "Issue(s) {} keep reappearing after refinement. How should they be resolved?",
                ids.join(", ")
            ),
            "critical",
        )];
        state.step_index = idx + 1;
        let index = state.iteration;
        return Ok(Some(escalate_to_human(ctx, state, groups, index)?));
    }
    if !report.overlapping.is_empty() {
        warn!(overlapping = ?report.overlapping, "issues pursued again after refinement");
        ctx.live.line(&format!(
            "issues pursued again: {}",
            report
                .overlapping
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    state.step_index = idx + 1;
    write_state(&ctx.paths.state_path, state)?;
    Ok(None)
}

fn refine_step(
    ctx: &SessionCtx<'_>,
    compressed: &str,
    workflow: &Workflow,
    state: &mut RunState,
    step: &WorkflowStep,
    idx: usize,
    step_name: &str,
) -> Result<Option<RunOutcome>> {
    if state.last_adjudication.is_none() {
        return Err(anyhow!(
            "refine step '{step_name}' has no adjudication to apply"
        ));
    }
    let agent = step_agent(ctx, step, ctx.config.generate_agent()?)?;
    let refined = match step.mode {
        RefineMode::Edit => edit_refinement(ctx, state, &agent)?,
        RefineMode::Rewrite => rewrite_pass(ctx, compressed, state, &agent, true)?,
    };
    let refined = match refined {
        Refined::Ok(text) => text,
        Refined::Retry => return Ok(None),
        Refined::Escalated(outcome) => return Ok(Some(outcome)),
    };

    record_artifact(ctx, state, &agent.name, "refine", refined)?;
    if let Some(target) = workflow.loop_target(idx) {
        // Jumping back re-evaluates from scratch: accumulated critique
        // state is cleared and the jump counts as a new iteration.
        state.critiques_by_step.clear();
        state.unadjudicated.clear();
        state.iteration += 1;
        state.step_index = target;
    } else {
        state.step_index = idx + 1;
    }
    write_state(&ctx.paths.state_path, state)?;
    Ok(None)
}

fn complete(
    ctx: &SessionCtx<'_>,
    state: &mut RunState,
    adjudication: Adjudication,
) -> Result<RunOutcome> {
    let artifact = state.artifact.clone().unwrap_or_default();
    fs::create_dir_all(&ctx.paths.final_dir)
        .with_context(|| format!("create {}", ctx.paths.final_dir.display()))?;
    write_text_atomic(&ctx.paths.final_dir.join("artifact.md"), &artifact)?;
    state.last_adjudication = Some(adjudication);
    write_state(&ctx.paths.state_path, state)?;
    ctx.live
        .banner(&format!("APPROVED at iteration {}", state.iteration));
    let summary = format!("approved after {} iteration(s)", state.iteration);
    Ok(RunOutcome::Completed {
        reason: "approved".to_string(),
        final_index: state.iteration,
        summary,
    })
}

fn budget_exhausted(ctx: &SessionCtx<'_>, state: &mut RunState) -> Result<RunOutcome> {
    let summary = format!(
        "iteration budget exhausted after {} iteration(s); {} issue(s) still pursuing",
        state.iteration.saturating_sub(1),
        state.last_pursuing.len()
    );
    if ctx
        .config
        .termination
        .escalate_on
        .contains(&EscalationTrigger::MaxIterations)
    {
        let groups = vec![AgentQuestions::orchestrator(
            "max_iterations",
            format!("{summary}. Provide guidance, then re-run to grant a fresh iteration budget."),
            "high",
        )];
        let index = state.iteration;
        return escalate_to_human(ctx, state, groups, index);
    }
    fs::create_dir_all(&ctx.paths.final_dir)
        .with_context(|| format!("create {}", ctx.paths.final_dir.display()))?;
    write_text_atomic(
        &ctx.paths.final_dir.join("status.md"),
        &format!("# Unresolved\n\n{summary}\n"),
    )?;
    ctx.live.banner("ITERATION BUDGET EXHAUSTED");
    Ok(RunOutcome::BudgetExhausted { summary })
}

/// Record a new artifact version: file, thread entry, checkpoint fields.
fn record_artifact(
    ctx: &SessionCtx<'_>,
    state: &mut RunState,
    agent_name: &str,
    phase: &str,
    artifact: String,
) -> Result<()> {
    let rel = format!("iterations/{}/artifact.md", state.iteration);
    write_text_atomic(&ctx.paths.run_dir.join(&rel), &artifact)?;

    let words = artifact.split_whitespace().count();
    let mut entry = ThreadEntry::new(agent_name, "generator", format!("artifact committed ({words} words)"));
    entry.iteration = Some(state.iteration);
    entry.phase = Some(phase.to_string());
    entry.artifact_path = Some(rel.clone());
    append_thread(&ctx.paths.thread_path, &entry)?;

    state.artifact = Some(artifact);
    state.artifact_path = Some(rel);
    state.validation_retries = 0;
    Ok(())
}

/// Drop ignored issues, pull out escalated ones, and report whether a HALT
/// disposition fired.
fn apply_dispositions(
    critique: &mut Critique,
    constraint: &Constraint,
    config: &OrchestratorConfig,
) -> (bool, Vec<CritiqueIssue>) {
    let mut kept = Vec::new();
    let mut halt = false;
    let mut escalated = Vec::new();
    for issue in std::mem::take(&mut critique.issues) {
        match disposition_for(
            constraint,
            issue.severity,
            &config.dispositions.overrides,
            &config.dispositions.default,
        ) {
            Disposition::Ignore => {
                debug!(issue = %issue.id, "issue dropped by IGNORE disposition");
            }
            Disposition::Escalate => escalated.push(issue),
            Disposition::Halt => {
                kept.push(issue);
                halt = true;
            }
            Disposition::Continue => kept.push(issue),
        }
    }
    critique.issues = kept;
    (halt, escalated)
}

/// Interpret an invocation as a critique; failures become ERROR critiques
/// visible to the adjudicator rather than crashing the batch.
fn critique_from_result(
    agent: &Agent,
    constraint: &Constraint,
    iteration: u32,
    result: Result<InvokeOutput>,
) -> Critique {
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            return Critique::error(
                &constraint.id,
                &agent.name,
                iteration,
                format!("invocation failed: {err:#}"),
            );
        }
    };
    if output.timed_out {
        return Critique::error(
            &constraint.id,
            &agent.name,
            iteration,
            output
                .error
                .unwrap_or_else(|| "invocation timed out".to_string()),
        );
    }
    if output.failed() && output.stdout.trim().is_empty() {
        return Critique::error(
            &constraint.id,
            &agent.name,
            iteration,
            format!("exit code {}: {}", output.exit_code, stderr_excerpt(&output)),
        );
    }
    parse_critique(&output.stdout, &agent.name, &constraint.id, iteration)
}

fn invoke_agent(ctx: &SessionCtx<'_>, agent: &Agent, prompt: String) -> Result<InvokeOutput> {
    let request = InvokeRequest {
        agent: agent.clone(),
        prompt,
        live_prefix: Some(agent.name.clone()),
    };
    ctx.invoker.invoke(&request, Some(ctx.live))
}

fn step_agent(ctx: &SessionCtx<'_>, step: &WorkflowStep, default_name: String) -> Result<Agent> {
    let name = step.agent.clone().unwrap_or(default_name);
    agent_named(ctx.agents, &name).cloned()
}

fn agent_named<'a>(agents: &'a BTreeMap<String, Agent>, name: &str) -> Result<&'a Agent> {
    agents
        .get(name)
        .ok_or_else(|| anyhow!("agent '{name}' is not configured"))
}

fn push_human_guidance(prompt: &mut String, ctx: &SessionCtx<'_>) {
    if let Some(answers) = &ctx.hitl_answers {
        let _ = write!(
            prompt,
            "\nHUMAN GUIDANCE\n{}\n",
            serde_json::to_string_pretty(answers).unwrap_or_default()
        );
    }
}

fn stderr_excerpt(output: &InvokeOutput) -> String {
    output.stderr.chars().take(300).collect()
}
