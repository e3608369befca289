//! Run directory layout.
//!
//! ```text
//! <state_dir>/
//! ├── orchestrator.lock
//! └── runs/
//!     ├── latest -> <name>           (symlink, most recently touched run)
//!     └── <name>/
//!         ├── state.json             (checkpoint)
//!         ├── thread.jsonl           (append-only event log)
//!         ├── live.log
//!         ├── goal.md / source.md
//!         ├── constraints/*.toml
//!         ├── iterations/<n>/{artifact.md,adjudication.json,critiques/}
//!         ├── turns/turn_NNNN/
//!         ├── hitl/{questions.json,answers.json}
//!         ├── final/artifact.md
//!         ├── resolution.json
//!         └── agent-result.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub state_dir: PathBuf,
    pub run_dir: PathBuf,
    pub state_path: PathBuf,
    pub thread_path: PathBuf,
    pub live_log_path: PathBuf,
    pub goal_path: PathBuf,
    pub source_path: PathBuf,
    pub constraints_dir: PathBuf,
    pub hitl_dir: PathBuf,
    pub questions_path: PathBuf,
    pub answers_path: PathBuf,
    pub final_dir: PathBuf,
    pub resolution_path: PathBuf,
    pub agent_result_path: PathBuf,
}

impl RunPaths {
    pub fn new(state_dir: &Path, run_name: &str) -> Self {
        let run_dir = state_dir.join("runs").join(run_name);
        let hitl_dir = run_dir.join("hitl");
        Self {
            state_dir: state_dir.to_path_buf(),
            state_path: run_dir.join("state.json"),
            thread_path: run_dir.join("thread.jsonl"),
            live_log_path: run_dir.join("live.log"),
            goal_path: run_dir.join("goal.md"),
            source_path: run_dir.join("source.md"),
            constraints_dir: run_dir.join("constraints"),
            questions_path: hitl_dir.join("questions.json"),
            answers_path: hitl_dir.join("answers.json"),
            final_dir: run_dir.join("final"),
            resolution_path: run_dir.join("resolution.json"),
            agent_result_path: run_dir.join("agent-result.json"),
            hitl_dir,
            run_dir,
        }
    }

    pub fn run_name(&self) -> String {
        self.run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.run_dir.join("iterations").join(iteration.to_string())
    }

    pub fn critiques_dir(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join("critiques")
    }

    pub fn turn_dir(&self, turn: u32) -> PathBuf {
        self.run_dir.join("turns").join(format!("turn_{turn:04}"))
    }
}

/// Point `<state_dir>/runs/latest` at `run_name` (relative symlink).
///
/// Best-effort on platforms without symlinks; failure is logged, never
/// fatal — the link is a convenience for run discovery.
pub fn update_latest_symlink(state_dir: &Path, run_name: &str) -> Result<()> {
    let runs_dir = state_dir.join("runs");
    fs::create_dir_all(&runs_dir)
        .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
    let link = runs_dir.join("latest");
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link).with_context(|| format!("remove old {}", link.display()))?;
    }
    #[cfg(unix)]
    {
        if let Err(err) = std::os::unix::fs::symlink(run_name, &link) {
            warn!(err = %err, "failed to update runs/latest symlink");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = run_name;
        warn!("runs/latest symlink not supported on this platform");
    }
    Ok(())
}
