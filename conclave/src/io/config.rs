//! Orchestrator configuration (`conclave.toml`) and profile overlays.
//!
//! The config file is intended to be edited by humans and must remain
//! stable and automatable. Missing fields default to working values; a
//! missing file is equivalent to an empty one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::approval::ApprovalPolicy;
use crate::core::disposition::DispositionTable;
use crate::core::model::{Agent, DispositionOverrides};
use crate::core::routing::RoutingConfig;
use crate::core::types::AgentKind;
use crate::core::workflow::{RefineMode, WorkflowStep, validate_steps};

/// Valid profile names (path-traversal guard for `profiles/<name>.toml`).
static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("name pattern"));

/// Which orchestration mode a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPattern {
    /// Fixed generate → critique → adjudicate → refine loop (or a custom
    /// workflow when one is configured).
    Pipeline,
    /// Turn-based conversation, one agent per turn.
    Sequential,
    /// Turn-based conversation, all agents per turn.
    Parallel,
}

/// One agent's command configuration (keyed by name in `[agents.<name>]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub cmd: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub suppress_stderr: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::Direct,
            cmd: Vec::new(),
            timeout_secs: None,
            suppress_stderr: false,
        }
    }
}

/// Per-phase agent assignment for the fixed pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasesConfig {
    /// Generator agent; defaults to the first configured agent.
    pub generate_agent: Option<String>,
    /// Adjudicator agent; defaults to the generator.
    pub adjudicate_agent: Option<String>,
    /// Critique agent pool; defaults to all configured agents.
    pub critique_agents: Vec<String>,
}

/// Refinement behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub mode: RefineMode,
    /// Failed-refinement retries before escalating to HITL.
    pub validation_retries: u32,
    /// Reject refinements changing word count by more than this percent.
    pub max_size_change_pct: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            mode: RefineMode::Edit,
            validation_retries: 2,
            max_size_change_pct: 20.0,
        }
    }
}

/// Conditions that escalate to HITL instead of terminating mechanically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    MaxIterations,
    Thrashing,
    ConflictingCriticals,
}

/// Termination and escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    pub approval_policy: ApprovalPolicy,
    pub escalate_on: Vec<EscalationTrigger>,
    pub thrash_threshold: u32,
    pub stagnation_threshold: f64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            approval_policy: ApprovalPolicy::default(),
            escalate_on: vec![EscalationTrigger::MaxIterations, EscalationTrigger::Thrashing],
            thrash_threshold: 2,
            stagnation_threshold: 0.90,
        }
    }
}

/// Disposition defaults plus per-constraint overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispositionsConfig {
    pub default: DispositionTable,
    pub overrides: BTreeMap<String, DispositionOverrides>,
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub state_dir: PathBuf,
    pub pattern: RunPattern,
    /// Turn budget added per invocation (conversation modes).
    pub turns: u32,
    /// Iteration budget (pipeline/workflow modes).
    pub max_iterations: u32,
    pub stop_on_consensus: bool,
    pub stop_on_stagnation: bool,
    /// Agents that must agree for consensus.
    pub min_agree: usize,
    pub enable_research: bool,
    /// Agent used for mid-run research requests.
    pub research_agent: Option<String>,
    /// Consult the expert router before a conversation run.
    pub expert_routing: bool,
    pub max_experts: Option<usize>,
    /// Captured-output byte limit per stream per invocation.
    pub output_limit_bytes: usize,
    /// Recent thread entries included in conversation prompts.
    pub thread_history: usize,
    /// Per-message truncation in conversation prompts.
    pub message_truncate_chars: usize,
    pub agents: BTreeMap<String, AgentConfig>,
    /// Conversation turn order; defaults to all agents by name.
    pub order: Vec<String>,
    pub phases: PhasesConfig,
    pub refine: RefineConfig,
    pub termination: TerminationConfig,
    pub routing: RoutingConfig,
    pub dispositions: DispositionsConfig,
    /// Custom workflow; absent means the fixed pipeline.
    pub workflow: Option<Vec<WorkflowStep>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".conclave"),
            pattern: RunPattern::Pipeline,
            turns: 6,
            max_iterations: 3,
            stop_on_consensus: false,
            stop_on_stagnation: false,
            min_agree: 2,
            enable_research: false,
            research_agent: None,
            expert_routing: false,
            max_experts: None,
            output_limit_bytes: 1_000_000,
            thread_history: 10,
            message_truncate_chars: 2000,
            agents: BTreeMap::new(),
            order: Vec::new(),
            phases: PhasesConfig::default(),
            refine: RefineConfig::default(),
            termination: TerminationConfig::default(),
            routing: RoutingConfig::default(),
            dispositions: DispositionsConfig::default(),
            workflow: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(anyhow!("no agents configured"));
        }
        for (name, agent) in &self.agents {
            if agent.cmd.is_empty() || agent.cmd[0].trim().is_empty() {
                return Err(anyhow!("agent '{name}' has an empty command"));
            }
        }
        for name in &self.order {
            if !self.agents.contains_key(name) {
                return Err(anyhow!("agent '{name}' in order but not defined in agents"));
            }
        }
        for name in self
            .phases
            .generate_agent
            .iter()
            .chain(self.phases.adjudicate_agent.iter())
            .chain(self.phases.critique_agents.iter())
        {
            if !self.agents.contains_key(name) {
                return Err(anyhow!("phase agent '{name}' not defined in agents"));
            }
        }
        if self.enable_research
            && let Some(name) = &self.research_agent
            && !self.agents.contains_key(name)
        {
            return Err(anyhow!("research agent '{name}' not defined in agents"));
        }
        if self.turns == 0 {
            return Err(anyhow!("turns must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.refine.max_size_change_pct <= 0.0 {
            return Err(anyhow!("refine.max_size_change_pct must be > 0"));
        }
        if let Some(steps) = &self.workflow {
            let errors = validate_steps(steps);
            if !errors.is_empty() {
                return Err(anyhow!("invalid workflow:\n- {}", errors.join("\n- ")));
            }
        }
        Ok(())
    }

    /// Agents as the shared read-only map the state machine consumes.
    pub fn build_agents(&self) -> BTreeMap<String, Agent> {
        self.agents
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    Agent {
                        name: name.clone(),
                        kind: cfg.kind,
                        cmd: cfg.cmd.clone(),
                        timeout_secs: cfg.timeout_secs,
                        suppress_stderr: cfg.suppress_stderr,
                    },
                )
            })
            .collect()
    }

    /// Conversation turn order: the configured order, else all agents.
    pub fn turn_order(&self) -> Vec<String> {
        if self.order.is_empty() {
            self.agents.keys().cloned().collect()
        } else {
            self.order.clone()
        }
    }

    /// Critique agent pool: configured, else all agents.
    pub fn critique_agents(&self) -> Vec<String> {
        if self.phases.critique_agents.is_empty() {
            self.agents.keys().cloned().collect()
        } else {
            self.phases.critique_agents.clone()
        }
    }

    pub fn generate_agent(&self) -> Result<String> {
        self.phases
            .generate_agent
            .clone()
            .or_else(|| self.turn_order().first().cloned())
            .ok_or_else(|| anyhow!("no generator agent available"))
    }

    pub fn adjudicate_agent(&self) -> Result<String> {
        match &self.phases.adjudicate_agent {
            Some(name) => Ok(name.clone()),
            None => self.generate_agent(),
        }
    }
}

/// Load config from a TOML file. Missing file ⇒ defaults.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(OrchestratorConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Profile overlay: a named partial configuration under
/// `<state_dir>/profiles/<name>.toml`.
///
/// Every field is a simple set-if-present override of the corresponding
/// config field; no deep merging. The explicit field list below is the
/// whole merge contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub description: Option<String>,
    pub pattern: Option<RunPattern>,
    pub turns: Option<u32>,
    pub max_iterations: Option<u32>,
    pub stop_on_consensus: Option<bool>,
    pub stop_on_stagnation: Option<bool>,
    pub order: Option<Vec<String>>,
}

/// Load a named profile, validating the name against path traversal.
pub fn load_profile(state_dir: &Path, name: &str) -> Result<Profile> {
    if !VALID_NAME.is_match(name) {
        return Err(anyhow!(
            "invalid profile name '{name}': must contain only alphanumeric, underscore, or hyphen"
        ));
    }
    let path = state_dir.join("profiles").join(format!("{name}.toml"));
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("read profile {}", path.display()))?;
    let profile: Profile =
        toml::from_str(&contents).with_context(|| format!("parse profile {}", path.display()))?;
    if let Some(description) = &profile.description {
        info!(profile = name, description, "profile loaded");
    }
    Ok(profile)
}

/// Apply a profile overlay to a config.
///
/// | profile field       | effect on config            |
/// |---------------------|-----------------------------|
/// | pattern             | replaces `pattern`          |
/// | turns               | replaces `turns`            |
/// | max_iterations      | replaces `max_iterations`   |
/// | stop_on_consensus   | replaces `stop_on_consensus`|
/// | stop_on_stagnation  | replaces `stop_on_stagnation`|
/// | order               | replaces `order`            |
pub fn apply_profile(cfg: &mut OrchestratorConfig, profile: &Profile) {
    if let Some(pattern) = profile.pattern {
        cfg.pattern = pattern;
    }
    if let Some(turns) = profile.turns {
        cfg.turns = turns;
    }
    if let Some(max_iterations) = profile.max_iterations {
        cfg.max_iterations = max_iterations;
    }
    if let Some(stop) = profile.stop_on_consensus {
        cfg.stop_on_consensus = stop;
    }
    if let Some(stop) = profile.stop_on_stagnation {
        cfg.stop_on_stagnation = stop;
    }
    if let Some(order) = &profile.order {
        cfg.order = order.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_agents(names: &[&str]) -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default();
        for name in names {
            cfg.agents.insert(
                name.to_string(),
                AgentConfig {
                    cmd: vec!["cat".to_string()],
                    ..AgentConfig::default()
                },
            );
        }
        cfg
    }

    #[test]
    fn config_without_agents_fails_validation() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn order_must_reference_defined_agents() {
        let mut cfg = config_with_agents(&["a"]);
        cfg.order = vec!["ghost".to_string()];
        let err = cfg.validate().expect_err("must fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conclave.toml");
        let cfg = config_with_agents(&["a", "b"]);
        std::fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");

        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn parses_full_config_file() {
        let raw = r#"
pattern = "parallel"
turns = 4
stop_on_consensus = true

[agents.critic-a]
kind = "direct"
cmd = ["critic-a", "--json"]
timeout_secs = 300

[agents.wrapped-b]
kind = "wrapped"
cmd = ["wrapped-b"]
suppress_stderr = true

[phases]
generate_agent = "critic-a"
critique_agents = ["critic-a", "wrapped-b"]

[refine]
mode = "rewrite"
validation_retries = 3

[termination]
approval_policy = "no_critical"
escalate_on = ["thrashing"]
thrash_threshold = 3

[[routing.rules]]
pattern = "safety-*"
agents = ["critic-a"]

[dispositions.overrides.tone]
critical = "continue"

[[workflow]]
step = "generate"
name = "draft"

[[workflow]]
step = "critique"
name = "review"
execution = "serial"
constraints = ["tone*"]

[[workflow]]
step = "adjudicate"
scope = "previous"
"#;
        let cfg: OrchestratorConfig = toml::from_str(raw).expect("parse");
        cfg.validate().expect("valid");
        assert_eq!(cfg.pattern, RunPattern::Parallel);
        assert_eq!(cfg.termination.thrash_threshold, 3);
        assert_eq!(cfg.agents["wrapped-b"].kind, AgentKind::Wrapped);
        assert_eq!(cfg.workflow.as_ref().map(Vec::len), Some(3));
        assert_eq!(cfg.generate_agent().expect("generator"), "critic-a");
    }

    #[test]
    fn invalid_workflow_fails_validation() {
        let mut cfg = config_with_agents(&["a"]);
        cfg.workflow = Some(vec![WorkflowStep {
            kind: crate::core::workflow::StepKind::Critique,
            ..WorkflowStep::default()
        }]);
        let err = cfg.validate().expect_err("must fail");
        assert!(err.to_string().contains("generate"));
    }

    #[test]
    fn profile_overlay_is_set_if_present() {
        let mut cfg = config_with_agents(&["a"]);
        let profile = Profile {
            turns: Some(12),
            stop_on_consensus: Some(true),
            ..Profile::default()
        };
        apply_profile(&mut cfg, &profile);
        assert_eq!(cfg.turns, 12);
        assert!(cfg.stop_on_consensus);
        // Untouched fields keep their values.
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.pattern, RunPattern::Pipeline);
    }

    #[test]
    fn profile_names_are_traversal_checked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_profile(temp.path(), "../evil").expect_err("must fail");
        assert!(err.to_string().contains("invalid profile name"));
    }
}
