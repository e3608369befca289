//! Test-only doubles and fixtures: scripted invokers and run directories.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::io::config::{AgentConfig, OrchestratorConfig, RunPattern};
use crate::io::invoke::{InvokeOutput, InvokeRequest, Invoker};
use crate::io::live::LiveLog;
use crate::io::paths::RunPaths;
use crate::session::RunOptions;

/// Record of one scripted invocation, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub agent: String,
    pub prompt: String,
}

/// Invoker that replays queued responses per agent name, without spawning
/// processes. Running out of script for an agent is an invocation error,
/// which the orchestrator absorbs into its usual error-shaped values.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    queues: Mutex<BTreeMap<String, VecDeque<InvokeOutput>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful stdout reply for `agent`.
    pub fn respond(&self, agent: &str, stdout: impl Into<String>) {
        self.push(agent, InvokeOutput::ok(stdout));
    }

    /// Queue a raw output (timeouts, non-zero exits) for `agent`.
    pub fn push(&self, agent: &str, output: InvokeOutput) {
        self.queues
            .lock()
            .expect("queues")
            .entry(agent.to_string())
            .or_default()
            .push_back(output);
    }

    /// All invocations made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }

    /// Prompts sent to `agent`, in order.
    pub fn prompts_for(&self, agent: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.agent == agent)
            .map(|call| call.prompt)
            .collect()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest, _live: Option<&LiveLog>) -> Result<InvokeOutput> {
        self.calls.lock().expect("calls").push(RecordedCall {
            agent: request.agent.name.clone(),
            prompt: request.prompt.clone(),
        });
        self.queues
            .lock()
            .expect("queues")
            .get_mut(&request.agent.name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted response left for agent '{}'", request.agent.name))
    }
}

/// A temporary state directory holding one named run.
pub struct TestRun {
    temp: tempfile::TempDir,
    pub name: String,
}

impl TestRun {
    pub fn new(name: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = Self {
            temp,
            name: name.to_string(),
        };
        std::fs::create_dir_all(run.paths().run_dir).expect("run dir");
        run
    }

    pub fn state_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> RunPaths {
        RunPaths::new(self.temp.path(), &self.name)
    }

    pub fn write_goal(&self, text: &str) {
        std::fs::write(self.paths().goal_path, text).expect("write goal");
    }

    pub fn write_constraint(&self, file: &str, toml: &str) {
        let dir = self.paths().constraints_dir;
        std::fs::create_dir_all(&dir).expect("constraints dir");
        std::fs::write(dir.join(file), toml).expect("write constraint");
    }

    pub fn write_config(&self, config: &OrchestratorConfig) {
        let rendered = toml::to_string_pretty(config).expect("serialize config");
        std::fs::write(self.temp.path().join("conclave.toml"), rendered).expect("write config");
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            state_dir: Some(self.temp.path().to_path_buf()),
            ..RunOptions::new(self.name.clone())
        }
    }
}

fn agent_config() -> AgentConfig {
    AgentConfig {
        // Never spawned: scripted invokers short-circuit execution.
        cmd: vec!["unused".to_string()],
        ..AgentConfig::default()
    }
}

/// Pipeline configuration: generator/adjudicator `gen`, critics `a` and `b`.
pub fn pipeline_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    for name in ["gen", "a", "b"] {
        config.agents.insert(name.to_string(), agent_config());
    }
    config.phases.generate_agent = Some("gen".to_string());
    config.phases.adjudicate_agent = Some("gen".to_string());
    config.phases.critique_agents = vec!["a".to_string(), "b".to_string()];
    config
}

/// Conversation configuration over the given agents, in order.
pub fn conversation_config(pattern: RunPattern, agents: &[&str]) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.pattern = pattern;
    for name in agents {
        config.agents.insert(name.to_string(), agent_config());
    }
    config.order = agents.iter().map(|name| name.to_string()).collect();
    config
}
