//! Closed tag enums shared across the orchestrator core.
//!
//! Every wire-level tag (severity, status, step kind, disposition) is a
//! variant type so exhaustiveness is checked at compile time. Unknown wire
//! values fail serde decoding and are absorbed by the tolerant parser paths,
//! never by a silent default branch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Issue severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// What to do with an issue of a given severity during a critique step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Stop critique collection and force the transition to adjudication.
    Halt,
    /// Skip adjudication, route directly to HITL.
    Escalate,
    /// Retain the issue for adjudication.
    Continue,
    /// Drop the issue before it reaches adjudication.
    Ignore,
}

/// Status declared by a conversational agent in its envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    NeedsHuman,
    NeedsResearch,
    Done,
    Error,
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeStatus::Ok => "ok",
            EnvelopeStatus::NeedsHuman => "needs_human",
            EnvelopeStatus::NeedsResearch => "needs_research",
            EnvelopeStatus::Done => "done",
            EnvelopeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Overall verdict of one critique.
///
/// `Error` marks a critique whose output could not be parsed; it is carried
/// to the adjudicator rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CritiqueVerdict {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for CritiqueVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CritiqueVerdict::Pass => "PASS",
            CritiqueVerdict::Fail => "FAIL",
            CritiqueVerdict::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Verdict of one adjudication pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdjudicationVerdict {
    Rewrite,
    Approved,
    Error,
}

impl fmt::Display for AdjudicationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdjudicationVerdict::Rewrite => "REWRITE",
            AdjudicationVerdict::Approved => "APPROVED",
            AdjudicationVerdict::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Whether an adjudicated issue is still being pursued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pursuing,
    Dismissed,
}

/// Output-wrapper family of an agent CLI.
///
/// `Direct` agents print the reply object (optionally fenced) on stdout.
/// `Wrapped` agents print an outer `{"response": ...}` envelope that must be
/// unwrapped one level before reply extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Direct,
    Wrapped,
}

impl Default for AgentKind {
    fn default() -> Self {
        AgentKind::Direct
    }
}
