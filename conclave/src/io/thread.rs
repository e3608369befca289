//! Durable append-only event log (`thread.jsonl`).
//!
//! One JSON record per line, fsynced per append. The thread doubles as the
//! conversation history fed back into prompts, so records carry whichever
//! of the optional fields apply to their phase.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::model::Question;
use crate::io::store::append_jsonl_durable;

/// One event in the run's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadEntry {
    pub id: String,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub agent: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues_count: Option<usize>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub research_topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agrees_with: Vec<String>,
}

impl ThreadEntry {
    /// Entry skeleton with a fresh id and timestamp.
    pub fn new(agent: impl Into<String>, role: impl Into<String>, content: impl Into<String>) -> Self {
        let agent = agent.into();
        let ts = Utc::now().to_rfc3339();
        Self {
            id: entry_id(&format!("{agent}:{ts}")),
            ts,
            agent,
            role: role.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Truncated SHA-256 of a seed, matching the wire id width.
pub fn entry_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Append one entry to the thread log, durably.
pub fn append_thread(path: &Path, entry: &ThreadEntry) -> Result<()> {
    append_jsonl_durable(path, entry)
}

/// Read the last `n` entries, newest last. Undecodable lines are skipped.
pub fn tail_thread(path: &Path, n: usize) -> Vec<ThreadEntry> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..]
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
