//! Turn-based multi-agent conversation loop.
//!
//! Each cycle invokes agents one-at-a-time (round-robin) or all
//! concurrently. A "done" set tracks completion declarations and resets per
//! full cycle, not per turn, so a single agent declaring done cannot end a
//! multi-agent run prematurely. Mid-run research requests invoke a
//! dedicated research agent and repeat the turn instead of consuming it.
//! The turn budget is granted per invocation: re-running a run out of turns
//! grants `turns` more from its checkpoint.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::consensus::check_consensus;
use crate::core::model::{Agent, Envelope, Question};
use crate::core::stagnation::detect_stagnation;
use crate::core::types::EnvelopeStatus;
use crate::io::artifacts::validate_artifacts;
use crate::io::config::{EscalationTrigger, RunPattern};
use crate::io::hitl::AgentQuestions;
use crate::io::invoke::{InvokeRequest, envelope_from_invoke, run_batch};
use crate::io::prompt::{conversation_prompt, research_prompt};
use crate::io::state::{RunState, write_state};
use crate::io::store::write_text_atomic;
use crate::io::thread::{ThreadEntry, append_thread, tail_thread};
use crate::session::{RunOutcome, SessionCtx, escalate_to_human};

/// Consecutive research interludes allowed before replies are taken as-is.
const MAX_RESEARCH_ROUNDS: u32 = 2;

/// Expert-routing collaborator contract.
///
/// The router is an external classifier returning a ranked subset of the
/// configured agent pool. A reported failure here is fatal to the run — the
/// core never guesses a fallback.
pub trait ExpertRouter {
    fn route(&self, goal: &str, pool: &[String], max_experts: Option<usize>)
    -> Result<ExpertSelection>;
}

/// Ranked routing verdict.
#[derive(Debug, Clone)]
pub struct ExpertSelection {
    pub experts: Vec<String>,
    /// Confidence label (e.g. "high", "speculative") for logging.
    pub confidence: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Drive conversation turns until all agents are done, a stop condition
/// fires, a human gate opens, or the turn budget runs out.
pub fn run_conversation(ctx: &SessionCtx<'_>, mut state: RunState) -> Result<RunOutcome> {
    let order = if state.experts.is_empty() {
        ctx.config.turn_order()
    } else {
        state.experts.clone()
    };
    if order.is_empty() {
        return Err(anyhow!("no agents in the conversation order"));
    }
    let parallel = ctx.config.pattern == RunPattern::Parallel;
    let pattern_name = if parallel { "parallel" } else { "sequential" };
    let last_turn = state.turn + ctx.config.turns;
    let mut pending_answers = ctx.hitl_answers.clone();
    let mut research_rounds = 0u32;

    info!(?order, pattern = pattern_name, turns = ctx.config.turns, "conversation started");

    loop {
        if state.turn >= last_turn {
            return budget_exhausted(ctx, &mut state);
        }

        // The done set belongs to a full cycle, not a turn.
        let cycle = if parallel {
            i64::from(state.turn)
        } else {
            i64::from(state.turn) / order.len() as i64
        };
        if cycle != state.done_cycle {
            state.done_agents.clear();
            state.done_cycle = cycle;
        }

        let turn_agents: Vec<Agent> = if parallel {
            order
                .iter()
                .map(|name| agent_named(ctx, name).cloned())
                .collect::<Result<_>>()?
        } else {
            let name = &order[state.turn as usize % order.len()];
            vec![agent_named(ctx, name)?.clone()]
        };

        let turn_dir = ctx.paths.turn_dir(state.turn);
        fs::create_dir_all(&turn_dir)
            .with_context(|| format!("create {}", turn_dir.display()))?;
        let tail = tail_thread(&ctx.paths.thread_path, ctx.config.thread_history);

        let mut requests = Vec::with_capacity(turn_agents.len());
        for agent in &turn_agents {
            let prompt = conversation_prompt(
                &agent.name,
                pattern_name,
                state.turn + 1,
                last_turn,
                &ctx.goal.goal_text,
                &ctx.goal.source,
                &tail,
                ctx.config.message_truncate_chars,
                pending_answers.as_ref(),
                ctx.config.enable_research,
                &state.experts,
            );
            write_text_atomic(&turn_dir.join(format!("{}_prompt.md", agent.name)), &prompt)?;
            requests.push(InvokeRequest {
                agent: agent.clone(),
                prompt,
                live_prefix: Some(agent.name.clone()),
            });
        }
        let names: Vec<&str> = turn_agents.iter().map(|a| a.name.as_str()).collect();
        ctx.live
            .banner(&format!("TURN {} ({})", state.turn + 1, names.join(", ")));

        let results = run_batch(ctx.invoker, Some(ctx.live), &requests);
        pending_answers = None;

        let mut round: BTreeMap<String, Envelope> = BTreeMap::new();
        for (agent, result) in turn_agents.iter().zip(results) {
            let envelope = match result {
                Ok(output) => {
                    write_text_atomic(
                        &turn_dir.join(format!("{}_output.txt", agent.name)),
                        &output.stdout,
                    )?;
                    if !output.stderr.is_empty() {
                        write_text_atomic(
                            &turn_dir.join(format!("{}_stderr.txt", agent.name)),
                            &output.stderr,
                        )?;
                    }
                    let mut envelope = envelope_from_invoke(agent, &output);
                    for warning in validate_artifacts(&envelope, &ctx.paths.run_dir) {
                        envelope.message.push_str(&format!("\n[warning] {warning}"));
                        ctx.live.prefixed(&agent.name, &format!("[warning] {warning}"));
                    }
                    envelope
                }
                Err(err) => Envelope::error(format!("invocation failed: {err:#}")),
            };

            let mut entry = entry_from_envelope(&agent.name, state.turn, &envelope);
            entry.phase = Some("conversation".to_string());
            append_thread(&ctx.paths.thread_path, &entry)?;

            // Questions arriving without a needs_human status are shown but
            // never block the run.
            if envelope.status != EnvelopeStatus::NeedsHuman && !envelope.questions.is_empty() {
                for question in &envelope.questions {
                    ctx.live.prefixed(
                        &agent.name,
                        &format!("[non-blocking question] {}", question.question),
                    );
                }
            }
            round.insert(agent.name.clone(), envelope);
        }

        let questioners: Vec<AgentQuestions> = round
            .iter()
            .filter(|(_, envelope)| envelope.status == EnvelopeStatus::NeedsHuman)
            .map(|(name, envelope)| AgentQuestions {
                agent: name.clone(),
                questions: if envelope.questions.is_empty() {
                    vec![Question {
                        id: "q1".to_string(),
                        question: envelope.message.clone(),
                        priority: "high".to_string(),
                        required: true,
                    }]
                } else {
                    envelope.questions.clone()
                },
            })
            .collect();
        if !questioners.is_empty() {
            let index = state.turn;
            return escalate_to_human(ctx, &mut state, questioners, index);
        }

        let topics: Vec<String> = round
            .values()
            .filter(|envelope| envelope.status == EnvelopeStatus::NeedsResearch)
            .flat_map(|envelope| envelope.research_topics.iter().cloned())
            .collect();
        if !topics.is_empty() {
            if ctx.config.enable_research && research_rounds < MAX_RESEARCH_ROUNDS {
                research_rounds += 1;
                run_research(ctx, &topics, state.turn)?;
                // A research interlude repeats the turn instead of counting it.
                continue;
            }
            warn!(?topics, "research requested but unavailable, taking replies as-is");
        }
        research_rounds = 0;

        for (name, envelope) in &round {
            if envelope.status == EnvelopeStatus::Done {
                state.done_agents.insert(name.clone());
            }
        }
        let all_done = order.iter().all(|name| state.done_agents.contains(name));

        if parallel {
            let statuses: Vec<String> = round
                .iter()
                .map(|(name, envelope)| format!("{name}={}", envelope.status))
                .collect();
            let mut entry = ThreadEntry::new(
                "orchestrator",
                "round_summary",
                format!("turn {}: {}", state.turn + 1, statuses.join(", ")),
            );
            entry.turn = Some(state.turn);
            append_thread(&ctx.paths.thread_path, &entry)?;
        }

        state.turn += 1;
        write_state(&ctx.paths.state_path, &state)?;

        if all_done {
            return complete(ctx, &state, "all_done", "all agents reported done");
        }
        if parallel
            && ctx.config.stop_on_consensus
            && check_consensus(&round, ctx.config.min_agree)
        {
            return complete(ctx, &state, "consensus", "agents reached consensus");
        }
        if ctx.config.stop_on_stagnation {
            let recent = recent_messages(ctx, &order);
            if detect_stagnation(&recent, &order, ctx.config.termination.stagnation_threshold) {
                return complete(
                    ctx,
                    &state,
                    "stagnation",
                    "conversation stagnated with no new progress",
                );
            }
        }
    }
}

fn complete(
    ctx: &SessionCtx<'_>,
    state: &RunState,
    reason: &str,
    summary: &str,
) -> Result<RunOutcome> {
    ctx.live.banner(&format!("RUN COMPLETE ({reason})"));
    Ok(RunOutcome::Completed {
        reason: reason.to_string(),
        final_index: state.turn,
        summary: summary.to_string(),
    })
}

fn budget_exhausted(ctx: &SessionCtx<'_>, state: &mut RunState) -> Result<RunOutcome> {
    let summary = format!("turn budget exhausted at turn {} without resolution", state.turn);
    if ctx
        .config
        .termination
        .escalate_on
        .contains(&EscalationTrigger::MaxIterations)
    {
        let groups = vec![AgentQuestions::orchestrator(
            "max_turns",
            format!(
                "{summary}. Provide guidance, then re-run to grant {} more turn(s).",
                ctx.config.turns
            ),
            "high",
        )];
        let index = state.turn;
        return escalate_to_human(ctx, state, groups, index);
    }
    fs::create_dir_all(&ctx.paths.final_dir)
        .with_context(|| format!("create {}", ctx.paths.final_dir.display()))?;
    write_text_atomic(
        &ctx.paths.final_dir.join("status.md"),
        &format!("# Unresolved\n\n{summary}\n"),
    )?;
    ctx.live.banner("TURN BUDGET EXHAUSTED");
    Ok(RunOutcome::BudgetExhausted { summary })
}

/// Invoke the research agent and append its findings to the history.
fn run_research(ctx: &SessionCtx<'_>, topics: &[String], turn: u32) -> Result<()> {
    let name = ctx
        .config
        .research_agent
        .clone()
        .ok_or_else(|| anyhow!("research requested but no research agent is configured"))?;
    let agent = agent_named(ctx, &name)?.clone();
    ctx.live
        .banner(&format!("RESEARCH INTERLUDE ({} topic(s))", topics.len()));

    let request = InvokeRequest {
        agent: agent.clone(),
        prompt: research_prompt(topics, &ctx.goal.goal_text),
        live_prefix: Some(agent.name.clone()),
    };
    let output = ctx.invoker.invoke(&request, Some(ctx.live))?;
    let content = if output.timed_out || (output.failed() && output.stdout.trim().is_empty()) {
        format!(
            "research failed: {}",
            output
                .error
                .unwrap_or_else(|| format!("exit code {}", output.exit_code))
        )
    } else {
        output.stdout.trim().to_string()
    };

    let mut entry = ThreadEntry::new(&agent.name, "research", content);
    entry.turn = Some(turn);
    entry.research_topics = topics.to_vec();
    append_thread(&ctx.paths.thread_path, &entry)?;
    debug!(agent = %agent.name, "research appended to history");
    Ok(())
}

/// Per-agent conversation messages, newest first, for stagnation checks.
fn recent_messages(ctx: &SessionCtx<'_>, order: &[String]) -> Vec<(String, String)> {
    let mut recent: Vec<(String, String)> =
        tail_thread(&ctx.paths.thread_path, order.len() * 6)
            .into_iter()
            .filter(|entry| entry.role == "assistant")
            .map(|entry| (entry.agent, entry.content))
            .collect();
    recent.reverse();
    recent
}

fn entry_from_envelope(agent: &str, turn: u32, envelope: &Envelope) -> ThreadEntry {
    let mut entry = ThreadEntry::new(agent, "assistant", envelope.message.clone());
    entry.turn = Some(turn);
    entry.status = Some(envelope.status.to_string());
    entry.questions = envelope.questions.clone();
    entry.research_topics = envelope.research_topics.clone();
    entry.confidence = envelope.confidence;
    entry.agrees_with = envelope.agrees_with.clone();
    entry
}

fn agent_named<'a>(ctx: &'a SessionCtx<'_>, name: &str) -> Result<&'a Agent> {
    ctx.agents
        .get(name)
        .ok_or_else(|| anyhow!("agent '{name}' is not configured"))
}
