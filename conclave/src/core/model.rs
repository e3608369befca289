//! Data model for agents, envelopes, constraints, critiques, and
//! adjudications.
//!
//! Envelope, Critique, and Adjudication values are produced once by the
//! parsers and never mutated afterwards (the single exception: validation
//! warnings appended to an envelope's message before it is recorded).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::{
    AdjudicationVerdict, AgentKind, CritiqueVerdict, DecisionStatus, Disposition, EnvelopeStatus,
    Severity,
};

/// Configuration for one external agent CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Agent {
    /// Stable name used in routing, logs, and file names.
    pub name: String,
    /// Output-wrapper family, selects envelope parsing rules.
    pub kind: AgentKind,
    /// Command and arguments; the prompt is written to stdin.
    pub cmd: Vec<String>,
    /// Per-invocation timeout in seconds. `None` means no timeout.
    pub timeout_secs: Option<u64>,
    /// Capture stderr but do not mirror it to the live log.
    pub suppress_stderr: bool,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: AgentKind::Direct,
            cmd: Vec::new(),
            timeout_secs: None,
            suppress_stderr: false,
        }
    }
}

/// A question an agent wants answered by a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Question {
    pub id: String,
    pub question: String,
    pub priority: String,
    pub required: bool,
}

impl Default for Question {
    fn default() -> Self {
        Self {
            id: String::new(),
            question: String::new(),
            priority: "normal".to_string(),
            required: false,
        }
    }
}

/// Reference to a file an agent claims to have produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactRef {
    pub path: String,
    pub description: String,
}

/// Structured reply from one conversational agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub message: String,
    pub questions: Vec<Question>,
    pub artifacts: Vec<ArtifactRef>,
    pub confidence: Option<f64>,
    pub agrees_with: Vec<String>,
    pub research_topics: Vec<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            status: EnvelopeStatus::Error,
            message: String::new(),
            questions: Vec::new(),
            artifacts: Vec::new(),
            confidence: None,
            agrees_with: Vec::new(),
            research_topics: Vec::new(),
        }
    }
}

impl Envelope {
    /// Error-status envelope carrying a failure description.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Per-severity disposition overrides carried by a constraint or configured
/// per constraint id. Unset severities fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispositionOverrides {
    pub critical: Option<Disposition>,
    pub high: Option<Disposition>,
    pub medium: Option<Disposition>,
    pub low: Option<Disposition>,
}

impl DispositionOverrides {
    pub fn get(&self, severity: Severity) -> Option<Disposition> {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.critical.is_none()
            && self.high.is_none()
            && self.medium.is_none()
            && self.low.is_none()
    }
}

/// A single rule within a constraint, evaluated by critics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintRule {
    pub id: String,
    pub text: String,
    pub default_severity: Severity,
}

impl Default for ConstraintRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            text: String::new(),
            default_severity: Severity::High,
        }
    }
}

/// A named, prioritized rule-set. Loaded once per run; immutable thereafter.
///
/// Priority is a total order: lower value = higher precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraint {
    pub id: String,
    pub priority: i64,
    /// Digest shown to generators.
    pub summary: String,
    /// Rules shown to critics.
    pub rules: Vec<ConstraintRule>,
    /// Per-constraint agent routing override.
    pub agents: Option<Vec<String>>,
    /// Per-constraint severity disposition overrides.
    pub dispositions: Option<DispositionOverrides>,
    /// Pre-analysis script the critic is asked to run against the artifact.
    pub script: Option<String>,
    /// Reference source-material paths for the critic.
    pub sources: Vec<String>,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            id: String::new(),
            priority: 10,
            summary: String::new(),
            rules: Vec::new(),
            agents: None,
            dispositions: None,
            script: None,
            sources: Vec::new(),
        }
    }
}

/// A section a critic explicitly signed off on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovedSection {
    pub location: String,
    pub note: String,
}

/// Atomic finding inside a critique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CritiqueIssue {
    pub id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub location: String,
    pub finding: String,
    pub evidence: String,
    pub suggested_fix: Option<String>,
    pub confidence: f64,
}

impl Default for CritiqueIssue {
    fn default() -> Self {
        Self {
            id: String::new(),
            rule_id: String::new(),
            severity: Severity::High,
            location: String::new(),
            finding: String::new(),
            evidence: String::new(),
            suggested_fix: None,
            confidence: 0.9,
        }
    }
}

/// One agent's verdict on one constraint at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Critique {
    pub constraint_id: String,
    pub reviewer: String,
    pub iteration: u32,
    pub overall: CritiqueVerdict,
    pub issues: Vec<CritiqueIssue>,
    pub approved_sections: Vec<ApprovedSection>,
    pub summary: String,
}

impl Default for Critique {
    fn default() -> Self {
        Self {
            constraint_id: String::new(),
            reviewer: String::new(),
            iteration: 1,
            overall: CritiqueVerdict::Fail,
            issues: Vec::new(),
            approved_sections: Vec::new(),
            summary: String::new(),
        }
    }
}

impl Critique {
    /// Sentinel critique for unparseable critic output.
    pub fn error(
        constraint_id: impl Into<String>,
        reviewer: impl Into<String>,
        iteration: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            constraint_id: constraint_id.into(),
            reviewer: reviewer.into(),
            iteration,
            overall: CritiqueVerdict::Error,
            summary: reason.into(),
            ..Self::default()
        }
    }

    pub fn count_at(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// One arbitrated decision about one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjudicationDecision {
    pub issue_id: String,
    pub constraint: String,
    pub severity: Severity,
    pub status: DecisionStatus,
    pub flagged_by: Vec<String>,
    pub competing_constraint: Option<String>,
    pub adjudication: Option<String>,
    pub rationale: Option<String>,
    pub guidance: Option<String>,
}

impl Default for AdjudicationDecision {
    fn default() -> Self {
        Self {
            issue_id: String::new(),
            constraint: String::new(),
            severity: Severity::High,
            status: DecisionStatus::Pursuing,
            flagged_by: Vec::new(),
            competing_constraint: None,
            adjudication: None,
            rationale: None,
            guidance: None,
        }
    }
}

/// One axis of tension between competing constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensionAnalysis {
    pub axis: String,
    pub current_position: String,
    pub target: String,
    pub guidance: String,
}

/// One arbitration pass over a set of critiques.
///
/// The free-text `bill_of_work` is the remediation instruction block handed
/// verbatim to the next refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjudication {
    pub iteration: u32,
    pub verdict: AdjudicationVerdict,
    pub tension_analysis: Vec<TensionAnalysis>,
    pub decisions: Vec<AdjudicationDecision>,
    pub bill_of_work: String,
}

impl Default for Adjudication {
    fn default() -> Self {
        Self {
            iteration: 1,
            verdict: AdjudicationVerdict::Rewrite,
            tension_analysis: Vec::new(),
            decisions: Vec::new(),
            bill_of_work: String::new(),
        }
    }
}

impl Adjudication {
    /// Sentinel adjudication for unparseable adjudicator output.
    pub fn error(iteration: u32, reason: impl Into<String>) -> Self {
        Self {
            iteration,
            verdict: AdjudicationVerdict::Error,
            bill_of_work: reason.into(),
            ..Self::default()
        }
    }

    /// Ids of issues still being pursued.
    pub fn pursuing_ids(&self) -> BTreeSet<String> {
        self.decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Pursuing)
            .map(|d| d.issue_id.clone())
            .collect()
    }

    /// Count of pursuing issues at the given severity.
    pub fn pursuing_at(&self, severity: Severity) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Pursuing && d.severity == severity)
            .count()
    }
}
