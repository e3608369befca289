//! Approval policy evaluation for adjudication results.

use serde::{Deserialize, Serialize};

use crate::core::model::Adjudication;
use crate::core::types::{AdjudicationVerdict, Severity};

/// Named, swappable approval predicate.
///
/// Every policy blocks on pursuing CRITICAL issues; the CRITICAL bar is not
/// relaxable. Policies differ only in how much HIGH they tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Approve only when no CRITICAL and no HIGH issues are pursuing.
    NoCriticalAndNoHigh,
    /// Approve when no CRITICAL issues are pursuing, regardless of HIGH.
    NoCritical,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy::NoCriticalAndNoHigh
    }
}

impl ApprovalPolicy {
    /// Whether a pursuing issue at `severity` blocks approval.
    pub fn blocks(&self, severity: Severity) -> bool {
        match self {
            ApprovalPolicy::NoCriticalAndNoHigh => {
                matches!(severity, Severity::Critical | Severity::High)
            }
            ApprovalPolicy::NoCritical => severity == Severity::Critical,
        }
    }

    /// Evaluate the policy over an adjudication's decisions.
    ///
    /// An ERROR-verdict adjudication never approves: it carries no decisions
    /// to inspect, so treating it as clean would approve on a parse failure.
    pub fn approves(&self, adjudication: &Adjudication) -> bool {
        if adjudication.verdict == AdjudicationVerdict::Error {
            return false;
        }
        !adjudication.decisions.iter().any(|d| {
            d.status == crate::core::types::DecisionStatus::Pursuing && self.blocks(d.severity)
        })
    }
}
