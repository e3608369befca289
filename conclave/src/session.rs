//! Run session lifecycle: locking, configuration resolution, HITL gating,
//! dispatch, and terminal result writing.
//!
//! A session owns exactly one run: it takes the state-directory lock, loads
//! configuration and goal, gates on any pending human input, dispatches to
//! the workflow engine or the conversation loop, and records the outcome in
//! `agent-result.json` (every terminal path) and `resolution.json`
//! (completed runs only). A run that already recorded a resolution
//! terminates immediately with the recorded result and performs no agent
//! invocations.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{info, warn};

use crate::conversation::{self, ExpertRouter};
use crate::core::model::Agent;
use crate::core::workflow::Workflow;
use crate::engine;
use crate::exit_codes;
use crate::io::config::{OrchestratorConfig, RunPattern, apply_profile, load_config, load_profile};
use crate::io::constraints::load_constraints;
use crate::io::goal::{LoadedGoal, load_goal};
use crate::io::hitl::{
    AgentQuestions, Resolution, ingest_answers, write_agent_result, write_questions,
    write_resolution,
};
use crate::io::invoke::{CliInvoker, Invoker};
use crate::io::live::LiveLog;
use crate::io::lock::RunLock;
use crate::io::paths::{RunPaths, update_latest_symlink};
use crate::io::state::{RunState, load_state, write_state};
use crate::io::store::{load_json, load_json_or};
use crate::io::thread::{ThreadEntry, append_thread};

/// Inputs for one `conclave run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub name: String,
    /// State directory; defaults to `.conclave` (or the config file's value
    /// when an explicit config path is given).
    pub state_dir: Option<PathBuf>,
    /// Explicit config file; defaults to `<state-dir>/conclave.toml`.
    pub config_path: Option<PathBuf>,
    /// Profile overlay name under `<state-dir>/profiles/`.
    pub profile: Option<String>,
    pub pattern: Option<RunPattern>,
    pub turns: Option<u32>,
    pub max_iterations: Option<u32>,
}

impl RunOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state_dir: None,
            config_path: None,
            profile: None,
            pattern: None,
            turns: None,
            max_iterations: None,
        }
    }
}

/// What a session invocation reported back to the caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit_code: i32,
    pub status: String,
    pub summary: Option<String>,
}

/// Shared read-only context handed to the execution modes.
pub struct SessionCtx<'a> {
    pub config: &'a OrchestratorConfig,
    pub agents: &'a BTreeMap<String, Agent>,
    pub paths: &'a RunPaths,
    pub live: &'a LiveLog,
    pub invoker: &'a dyn Invoker,
    pub goal: &'a LoadedGoal,
    /// Answers ingested at session start, injected into the next prompts.
    pub hitl_answers: Option<Value>,
}

/// Terminal state of one execution-mode invocation.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        reason: String,
        final_index: u32,
        summary: String,
    },
    AwaitingHuman {
        questions: Vec<AgentQuestions>,
    },
    BudgetExhausted {
        summary: String,
    },
}

/// Persist questions, set the pending flag, and stop the run.
pub(crate) fn escalate_to_human(
    ctx: &SessionCtx<'_>,
    state: &mut RunState,
    groups: Vec<AgentQuestions>,
    index: u32,
) -> Result<RunOutcome> {
    write_questions(ctx.paths, ctx.live, &groups, index)?;
    state.awaiting_human = true;
    write_state(&ctx.paths.state_path, state)?;
    Ok(RunOutcome::AwaitingHuman { questions: groups })
}

/// Execute (start or resume) a run.
///
/// `invoker` defaults to the real CLI invoker when `None`; tests pass a
/// scripted one. `router` is the expert-routing collaborator — routing
/// enabled in configuration with no router wired is a fatal configuration
/// error, never silently defaulted.
pub fn execute_run(
    opts: &RunOptions,
    invoker: Option<&dyn Invoker>,
    router: Option<&dyn ExpertRouter>,
) -> Result<RunReport> {
    let prepared = prepare(opts);
    let state_dir = match &prepared {
        Ok((_, dir)) => dir.clone(),
        Err(_) => opts
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".conclave")),
    };

    // Lock conflicts stay write-free: another process owns the result files.
    let _lock = RunLock::acquire(&state_dir)?;
    let paths = RunPaths::new(&state_dir, &opts.name);

    let result = prepared.and_then(|(config, _)| {
        let cli_invoker;
        let invoker: &dyn Invoker = match invoker {
            Some(invoker) => invoker,
            None => {
                cli_invoker = CliInvoker {
                    output_limit_bytes: config.output_limit_bytes,
                };
                &cli_invoker
            }
        };
        run_locked(opts, &config, &paths, invoker, router)
    });

    match result {
        Ok(report) => Ok(report),
        Err(err) => {
            let message = format!("{err:#}");
            let _ = fs::create_dir_all(&paths.run_dir);
            let _ = write_agent_result(
                &paths,
                "error",
                exit_codes::ERROR,
                None,
                None,
                Some(&message),
            );
            Err(err)
        }
    }
}

/// Resolve configuration, overlay the profile and CLI overrides, validate.
fn prepare(opts: &RunOptions) -> Result<(OrchestratorConfig, PathBuf)> {
    let (mut config, state_dir) = match &opts.config_path {
        Some(path) => {
            let config = load_config(path)?;
            let state_dir = opts
                .state_dir
                .clone()
                .unwrap_or_else(|| config.state_dir.clone());
            (config, state_dir)
        }
        None => {
            let state_dir = opts
                .state_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".conclave"));
            let config = load_config(&state_dir.join("conclave.toml"))?;
            (config, state_dir)
        }
    };

    if let Some(name) = &opts.profile {
        let profile = load_profile(&state_dir, name)?;
        apply_profile(&mut config, &profile);
    }
    if let Some(pattern) = opts.pattern {
        config.pattern = pattern;
    }
    if let Some(turns) = opts.turns {
        config.turns = turns;
    }
    if let Some(max_iterations) = opts.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.validate()?;
    Ok((config, state_dir))
}

fn run_locked(
    opts: &RunOptions,
    config: &OrchestratorConfig,
    paths: &RunPaths,
    invoker: &dyn Invoker,
    router: Option<&dyn ExpertRouter>,
) -> Result<RunReport> {
    // Idempotent completion: a resolved run re-reports without invoking.
    if paths.resolution_path.exists() {
        let resolution: Resolution = load_json(&paths.resolution_path)?;
        let recorded: Value = load_json_or(&paths.agent_result_path, Value::Null);
        let exit_code = recorded
            .get("exit_code")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
            .unwrap_or(exit_codes::OK);
        info!(run = %opts.name, reason = %resolution.reason, "run already resolved");
        return Ok(RunReport {
            exit_code,
            status: "done".to_string(),
            summary: Some(resolution.summary),
        });
    }

    let fresh = !paths.run_dir.exists();
    fs::create_dir_all(&paths.run_dir)
        .with_context(|| format!("create run dir {}", paths.run_dir.display()))?;
    update_latest_symlink(&paths.state_dir, &opts.name)?;
    let live = LiveLog::open(&paths.live_log_path)?;
    info!(run = %opts.name, fresh, pattern = ?config.pattern, "session started");

    let goal = load_goal(paths).ok_or_else(|| {
        anyhow!(
            "no goal found at {} (create one with `conclave init {}`)",
            paths.goal_path.display(),
            opts.name
        )
    })?;

    let mut state = load_state(&paths.state_path);

    // HITL gate: a pending question either resumes with answers or stops
    // the session again with the HITL status.
    let mut hitl_answers = None;
    if state.awaiting_human {
        if !paths.questions_path.exists() {
            warn!("HITL pending flag set but questions record is missing, clearing and resuming");
            state.awaiting_human = false;
            write_state(&paths.state_path, &state)?;
        } else {
            match ingest_answers(paths)? {
                Some(answers) => {
                    state.awaiting_human = false;
                    write_state(&paths.state_path, &state)?;
                    let mut entry = ThreadEntry::new(
                        "human",
                        "human",
                        serde_json::to_string_pretty(&answers).unwrap_or_default(),
                    );
                    entry.turn = Some(state.turn);
                    append_thread(&paths.thread_path, &entry)?;
                    live.line("human answers ingested, resuming");
                    hitl_answers = Some(answers);
                }
                None => {
                    live.line("still awaiting human answers");
                    let summary = format!(
                        "still awaiting human answers in {}",
                        paths.answers_path.display()
                    );
                    write_agent_result(
                        paths,
                        "awaiting_human",
                        exit_codes::HITL,
                        Some(&summary),
                        None,
                        None,
                    )?;
                    return Ok(RunReport {
                        exit_code: exit_codes::HITL,
                        status: "awaiting_human".to_string(),
                        summary: Some(summary),
                    });
                }
            }
        }
    }

    let agents = config.build_agents();

    if config.pattern != RunPattern::Pipeline && config.expert_routing && state.experts.is_empty()
    {
        let router = router
            .ok_or_else(|| anyhow!("expert routing is enabled but no routing collaborator is wired"))?;
        let pool = config.turn_order();
        let selection = router
            .route(&goal.goal_text, &pool, config.max_experts)
            .context("expert routing")?;
        if !selection.ok {
            return Err(anyhow!(
                "expert routing reported failure: {}",
                selection.error.as_deref().unwrap_or("unknown")
            ));
        }
        let experts: Vec<String> = selection
            .experts
            .iter()
            .filter(|name| agents.contains_key(*name))
            .cloned()
            .collect();
        if experts.is_empty() {
            return Err(anyhow!("expert routing returned no configured experts"));
        }
        info!(?experts, confidence = %selection.confidence, "experts selected");
        live.line(&format!(
            "experts selected ({}): {}",
            selection.confidence,
            experts.join(", ")
        ));
        state.experts = experts;
        write_state(&paths.state_path, &state)?;
    }

    let ctx = SessionCtx {
        config,
        agents: &agents,
        paths,
        live: &live,
        invoker,
        goal: &goal,
        hitl_answers,
    };

    let outcome = match config.pattern {
        RunPattern::Pipeline => {
            let constraints = load_constraints(&paths.constraints_dir)?;
            let workflow = match &config.workflow {
                Some(steps) => Workflow::new(steps.clone())
                    .map_err(|errors| anyhow!("invalid workflow:\n- {}", errors.join("\n- ")))?,
                None => Workflow::fixed_pipeline(),
            };
            engine::run_workflow(&ctx, &constraints, &workflow, state)?
        }
        RunPattern::Sequential | RunPattern::Parallel => {
            conversation::run_conversation(&ctx, state)?
        }
    };

    finish(paths, outcome)
}

fn finish(paths: &RunPaths, outcome: RunOutcome) -> Result<RunReport> {
    match outcome {
        RunOutcome::Completed {
            reason,
            final_index,
            summary,
        } => {
            write_resolution(paths, &reason, final_index, &summary)?;
            write_agent_result(paths, "done", exit_codes::OK, Some(&summary), None, None)?;
            Ok(RunReport {
                exit_code: exit_codes::OK,
                status: "done".to_string(),
                summary: Some(summary),
            })
        }
        RunOutcome::AwaitingHuman { questions } => {
            write_agent_result(
                paths,
                "awaiting_human",
                exit_codes::HITL,
                None,
                Some(&questions),
                None,
            )?;
            Ok(RunReport {
                exit_code: exit_codes::HITL,
                status: "awaiting_human".to_string(),
                summary: None,
            })
        }
        RunOutcome::BudgetExhausted { summary } => {
            write_agent_result(
                paths,
                "max_budget",
                exit_codes::MAX_TURNS,
                Some(&summary),
                None,
                None,
            )?;
            Ok(RunReport {
                exit_code: exit_codes::MAX_TURNS,
                status: "max_budget".to_string(),
                summary: Some(summary),
            })
        }
    }
}

/// Create a run directory with a goal template for the user to edit.
pub fn init_run(name: &str, state_dir: &std::path::Path) -> Result<PathBuf> {
    let paths = RunPaths::new(state_dir, name);
    if paths.goal_path.exists() {
        return Err(anyhow!(
            "run '{name}' already has a goal at {}",
            paths.goal_path.display()
        ));
    }
    fs::create_dir_all(&paths.constraints_dir)
        .with_context(|| format!("create {}", paths.constraints_dir.display()))?;
    crate::io::goal::create_goal_template(&paths)?;
    update_latest_symlink(state_dir, name)?;
    Ok(paths.goal_path)
}

/// Report the latest recorded outcome of a run as pretty JSON.
pub fn run_status(name: &str, state_dir: &std::path::Path) -> Result<String> {
    let paths = RunPaths::new(state_dir, name);
    if !paths.run_dir.exists() {
        return Err(anyhow!(
            "no run named '{name}' under {}",
            state_dir.display()
        ));
    }
    let state = load_state(&paths.state_path);
    let last_result: Value = load_json_or(&paths.agent_result_path, Value::Null);
    let resolution: Value = load_json_or(&paths.resolution_path, Value::Null);
    serde_json::to_string_pretty(&serde_json::json!({
        "run": name,
        "iteration": state.iteration,
        "turn": state.turn,
        "awaiting_human": state.awaiting_human,
        "last_result": last_result,
        "resolution": resolution,
    }))
    .context("serialize status")
}
