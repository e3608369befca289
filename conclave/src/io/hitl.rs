//! Human-in-the-loop persistence: questions out, answers in, results out.
//!
//! The protocol is file-based. Questions land in `hitl/questions.json`
//! together with the expected answer-file shape; the run exits with the
//! HITL status. A human writes `hitl/answers.json` and re-invokes the run.
//! Ingested answer files are archived under a content hash, never deleted,
//! for audit.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::core::model::Question;
use crate::io::live::LiveLog;
use crate::io::paths::RunPaths;
use crate::io::store::write_json_atomic;
use crate::io::thread::entry_id;

/// Questions raised by one agent (or the orchestrator itself).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentQuestions {
    pub agent: String,
    pub questions: Vec<Question>,
}

impl AgentQuestions {
    /// Orchestrator-raised question group (escalations, validation failures).
    pub fn orchestrator(id: &str, question: String, priority: &str) -> Self {
        Self {
            agent: "orchestrator".to_string(),
            questions: vec![Question {
                id: id.to_string(),
                question,
                priority: priority.to_string(),
                required: true,
            }],
        }
    }
}

/// Persist pending questions and mirror them to the live log.
pub fn write_questions(
    paths: &RunPaths,
    live: &LiveLog,
    groups: &[AgentQuestions],
    index: u32,
) -> Result<()> {
    let record = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "turn": index,
        "questions": groups,
        "answer_format": {
            "answers": [{"question_id": "q1", "answer": "your answer"}]
        },
    });
    write_json_atomic(&paths.questions_path, &record)
        .with_context(|| format!("write {}", paths.questions_path.display()))?;

    live.banner("HUMAN INPUT NEEDED");
    for group in groups {
        live.line(&format!("[{}] asks:", group.agent));
        for q in &group.questions {
            live.line(&format!("  [{}] {}", q.id, q.question));
        }
    }
    live.line(&format!(
        "Edit {} to respond, then re-run with the same name",
        paths.answers_path.display()
    ));
    info!(count = groups.len(), "HITL questions written");
    Ok(())
}

/// Read and consume `hitl/answers.json`.
///
/// `Ok(None)` when no answers have been provided yet. A consumed file is
/// renamed to `answers_<content-hash>.processed.json` in place, never
/// deleted, so the exchange stays auditable.
pub fn ingest_answers(paths: &RunPaths) -> Result<Option<Value>> {
    if !paths.answers_path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&paths.answers_path)
        .with_context(|| format!("read {}", paths.answers_path.display()))?;
    let answers: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
    if answers.is_null() {
        return Ok(None);
    }

    let archive_name = format!("answers_{}.processed.json", entry_id(&raw));
    let archive_path = paths.hitl_dir.join(archive_name);
    std::fs::rename(&paths.answers_path, &archive_path)
        .with_context(|| format!("archive answers to {}", archive_path.display()))?;
    info!(archive = %archive_path.display(), "HITL answers ingested");
    Ok(Some(answers))
}

/// Terminal outcome summary for supervising processes.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult<'a> {
    pub timestamp: String,
    pub run_name: String,
    pub status: &'a str,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<&'a [AgentQuestions]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

/// Write `agent-result.json`; every terminal path goes through this so a
/// subsequent invocation can explain what happened without re-deriving it.
pub fn write_agent_result(
    paths: &RunPaths,
    status: &str,
    exit_code: i32,
    summary: Option<&str>,
    questions: Option<&[AgentQuestions]>,
    error: Option<&str>,
) -> Result<()> {
    let result = AgentResult {
        timestamp: Utc::now().to_rfc3339(),
        run_name: paths.run_name(),
        status,
        exit_code,
        summary,
        questions,
        error,
    };
    write_json_atomic(&paths.agent_result_path, &result)
        .with_context(|| format!("write {}", paths.agent_result_path.display()))
}

/// Final resolution record for a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub timestamp: String,
    pub reason: String,
    pub final_index: u32,
    pub summary: String,
}

pub fn write_resolution(paths: &RunPaths, reason: &str, final_index: u32, summary: &str) -> Result<()> {
    let resolution = Resolution {
        timestamp: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        final_index,
        summary: summary.to_string(),
    };
    write_json_atomic(&paths.resolution_path, &resolution)
        .with_context(|| format!("write {}", paths.resolution_path.display()))
}
