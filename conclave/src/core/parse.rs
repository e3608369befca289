//! Tolerant parsers for semi-structured agent output.
//!
//! Agents are asked for a single JSON object but routinely wrap it in fenced
//! code blocks, prose, or an outer CLI envelope. These parsers never return
//! an error: every failure path produces a sentinel ERROR-shaped value so the
//! pipeline keeps moving and the failure is surfaced to the adjudicator or a
//! human reviewer instead of crashing the run.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::model::{Adjudication, Critique, Envelope};
use crate::core::types::AgentKind;

/// Maximum length of raw-output excerpts embedded in error messages.
const EXCERPT_LEN: usize = 500;

static FENCED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced object pattern")
});

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|toml)?\s*(.*?)```").expect("fenced block pattern"));

/// Extract the JSON object payload from `raw`: the first fenced code block
/// holding an object if present, otherwise the raw text itself.
fn extract_object(raw: &str) -> &str {
    match FENCED_OBJECT.captures(raw) {
        Some(caps) => caps.get(1).map_or(raw, |m| m.as_str()),
        None => raw,
    }
}

fn excerpt(raw: &str) -> String {
    if raw.chars().count() > EXCERPT_LEN {
        let cut: String = raw.chars().take(EXCERPT_LEN).collect();
        format!("{cut}...")
    } else {
        raw.to_string()
    }
}

/// Parse a conversational reply into an [`Envelope`]. Never fails.
pub fn parse_envelope(raw: &str, kind: AgentKind) -> Envelope {
    let raw = raw.trim();

    if kind == AgentKind::Wrapped {
        return parse_wrapped_envelope(raw);
    }

    let payload = extract_object(raw);
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(_)) => match serde_json::from_str::<Envelope>(payload) {
            Ok(env) => env,
            Err(err) => Envelope::error(format!("Envelope decode error: {err}")),
        },
        Ok(_) => Envelope::error("Output is not a JSON object"),
        Err(err) => Envelope::error(format!("JSON parse error: {err}. Raw: {}", excerpt(raw))),
    }
}

/// Unwrap one outer `{"response": ...}` level, then parse the inner reply.
///
/// The inner value may be a JSON string holding the envelope, an embedded
/// object, or plain text (treated as an ok-status message).
fn parse_wrapped_envelope(raw: &str) -> Envelope {
    let outer: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => return Envelope::error(format!("Wrapper JSON parse failed: {err}")),
    };
    let Some(inner) = outer.get("response") else {
        return Envelope::error("Wrapper object has no 'response' field");
    };
    match inner {
        Value::String(text) => match serde_json::from_str::<Envelope>(extract_object(text)) {
            Ok(env) => env,
            Err(_) => Envelope {
                status: crate::core::types::EnvelopeStatus::Ok,
                message: text.clone(),
                ..Envelope::default()
            },
        },
        Value::Object(_) => match serde_json::from_value::<Envelope>(inner.clone()) {
            Ok(env) => env,
            Err(err) => Envelope::error(format!("Wrapped envelope decode error: {err}")),
        },
        other => Envelope::error(format!("Unexpected wrapped response type: {other}")),
    }
}

/// Parse a critic reply into a [`Critique`]. Never fails.
///
/// The reviewer, constraint id, and iteration are stamped by the caller and
/// override whatever the agent echoed back.
pub fn parse_critique(raw: &str, reviewer: &str, constraint_id: &str, iteration: u32) -> Critique {
    let payload = extract_object(raw.trim());
    match serde_json::from_str::<Critique>(payload) {
        Ok(mut critique) => {
            critique.reviewer = reviewer.to_string();
            critique.constraint_id = constraint_id.to_string();
            critique.iteration = iteration;
            critique
        }
        Err(err) => {
            warn!(reviewer, constraint_id, err = %err, "failed to parse critique");
            Critique::error(
                constraint_id,
                reviewer,
                iteration,
                format!("Failed to parse critique: {err}"),
            )
        }
    }
}

/// Wire shape of the adjudication verdict object.
///
/// Agents may embed the bill of work as a field (legacy single-block
/// shape); the caller stamps the iteration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdjudicationWire {
    status: Option<String>,
    tension_analysis: Vec<crate::core::model::TensionAnalysis>,
    decisions: Vec<crate::core::model::AdjudicationDecision>,
    bill_of_work: Option<String>,
}

const ADJUDICATION_MARKER: &str = "=== ADJUDICATION ===";
const BILL_MARKER: &str = "=== BILL_OF_WORK ===";

/// Parse an adjudicator reply. Never fails.
///
/// Preferred wire shape: two delimited sections, a structured verdict object
/// under `=== ADJUDICATION ===` and raw remediation text under
/// `=== BILL_OF_WORK ===` (keeps multi-paragraph instructions out of JSON
/// string escaping). Legacy shape: one structured block with `bill_of_work`
/// embedded as a field. Structured decoding tries JSON first, then TOML.
pub fn parse_adjudication(raw: &str, iteration: u32) -> Adjudication {
    let raw = raw.trim();

    if let Some((verdict_part, bill_part)) = split_sections(raw) {
        let payload = extract_block(verdict_part);
        return match decode_wire(payload) {
            Ok(wire) => finish(wire, Some(bill_part.trim().to_string()), iteration),
            Err(err) => {
                warn!(err = %err, "failed to parse sectioned adjudication");
                Adjudication::error(iteration, format!("Failed to parse adjudication: {err}"))
            }
        };
    }

    let payload = extract_block(raw);
    match decode_wire(payload) {
        Ok(wire) => finish(wire, None, iteration),
        Err(err) => {
            warn!(err = %err, "failed to parse adjudication");
            Adjudication::error(iteration, format!("Failed to parse adjudication: {err}"))
        }
    }
}

/// Split the two-section wire shape; `None` when the markers are absent.
fn split_sections(raw: &str) -> Option<(&str, &str)> {
    let after_verdict = raw.split_once(ADJUDICATION_MARKER)?.1;
    let (verdict, bill) = after_verdict.split_once(BILL_MARKER)?;
    Some((verdict.trim(), bill))
}

/// Extract fenced block content if present (any dialect), else the raw text.
fn extract_block(raw: &str) -> &str {
    match FENCED_BLOCK.captures(raw) {
        Some(caps) => caps.get(1).map_or(raw, |m| m.as_str().trim()),
        None => raw,
    }
}

fn decode_wire(payload: &str) -> Result<AdjudicationWire, String> {
    match serde_json::from_str::<AdjudicationWire>(payload) {
        Ok(wire) => Ok(wire),
        Err(json_err) => match toml::from_str::<AdjudicationWire>(payload) {
            Ok(wire) => Ok(wire),
            Err(toml_err) => Err(format!("json: {json_err}; toml: {toml_err}")),
        },
    }
}

fn finish(wire: AdjudicationWire, bill_section: Option<String>, iteration: u32) -> Adjudication {
    let verdict = match wire.status.as_deref() {
        Some("APPROVED") => crate::core::types::AdjudicationVerdict::Approved,
        Some("ERROR") => crate::core::types::AdjudicationVerdict::Error,
        _ => crate::core::types::AdjudicationVerdict::Rewrite,
    };
    Adjudication {
        iteration,
        verdict,
        tension_analysis: wire.tension_analysis,
        decisions: wire.decisions,
        bill_of_work: bill_section.or(wire.bill_of_work).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AdjudicationVerdict, CritiqueVerdict, DecisionStatus, EnvelopeStatus, Severity};

    #[test]
    fn envelope_parses_bare_json() {
        let env = parse_envelope(r#"{"status": "done", "message": "finished"}"#, AgentKind::Direct);
        assert_eq!(env.status, EnvelopeStatus::Done);
        assert_eq!(env.message, "finished");
    }

    #[test]
    fn envelope_parses_fenced_json() {
        let raw = "Here is my reply:\n```json\n{\"status\": \"ok\", \"message\": \"m\"}\n```\nthanks";
        let env = parse_envelope(raw, AgentKind::Direct);
        assert_eq!(env.status, EnvelopeStatus::Ok);
    }

    #[test]
    fn envelope_parse_failure_yields_error_value_with_excerpt() {
        let long = "x".repeat(800);
        let env = parse_envelope(&long, AgentKind::Direct);
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert!(env.message.contains("..."));
        assert!(env.message.len() < 700);
    }

    #[test]
    fn envelope_rejects_non_object_json() {
        let env = parse_envelope("[1, 2, 3]", AgentKind::Direct);
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert!(env.message.contains("not a JSON object"));
    }

    #[test]
    fn wrapped_envelope_unwraps_string_response() {
        let raw = r#"{"response": "{\"status\": \"ok\", \"message\": \"inner\"}"}"#;
        let env = parse_envelope(raw, AgentKind::Wrapped);
        assert_eq!(env.status, EnvelopeStatus::Ok);
        assert_eq!(env.message, "inner");
    }

    #[test]
    fn wrapped_envelope_accepts_plain_text_response() {
        let raw = r#"{"response": "just some prose"}"#;
        let env = parse_envelope(raw, AgentKind::Wrapped);
        assert_eq!(env.status, EnvelopeStatus::Ok);
        assert_eq!(env.message, "just some prose");
    }

    #[test]
    fn wrapped_envelope_accepts_embedded_object() {
        let raw = r#"{"response": {"status": "done", "message": "d"}}"#;
        let env = parse_envelope(raw, AgentKind::Wrapped);
        assert_eq!(env.status, EnvelopeStatus::Done);
    }

    #[test]
    fn critique_stamps_caller_identity() {
        let raw = r#"{"constraint_id": "echoed-wrong", "overall": "PASS", "issues": []}"#;
        let critique = parse_critique(raw, "critic-a", "tone", 3);
        assert_eq!(critique.reviewer, "critic-a");
        assert_eq!(critique.constraint_id, "tone");
        assert_eq!(critique.iteration, 3);
        assert_eq!(critique.overall, CritiqueVerdict::Pass);
    }

    #[test]
    fn critique_parse_failure_is_visible_to_adjudicator() {
        let critique = parse_critique("not json at all", "critic-a", "tone", 1);
        assert_eq!(critique.overall, CritiqueVerdict::Error);
        assert!(critique.issues.is_empty());
        assert!(critique.summary.contains("Failed to parse critique"));
    }

    #[test]
    fn adjudication_parses_two_section_shape() {
        let raw = r#"
=== ADJUDICATION ===
{
  "status": "REWRITE",
  "decisions": [
    {"issue_id": "tone-001", "constraint": "tone", "severity": "HIGH", "status": "pursuing"}
  ]
}

=== BILL_OF_WORK ===
### Issue: tone-001 (HIGH)
**Action:** Replace
"#;
        let adj = parse_adjudication(raw, 2);
        assert_eq!(adj.verdict, AdjudicationVerdict::Rewrite);
        assert_eq!(adj.iteration, 2);
        assert_eq!(adj.decisions.len(), 1);
        assert_eq!(adj.decisions[0].severity, Severity::High);
        assert_eq!(adj.decisions[0].status, DecisionStatus::Pursuing);
        assert!(adj.bill_of_work.contains("tone-001"));
    }

    #[test]
    fn adjudication_parses_legacy_single_block() {
        let raw = r#"```json
{"status": "APPROVED", "decisions": [], "bill_of_work": "nothing to do"}
```"#;
        let adj = parse_adjudication(raw, 1);
        assert_eq!(adj.verdict, AdjudicationVerdict::Approved);
        assert_eq!(adj.bill_of_work, "nothing to do");
    }

    #[test]
    fn adjudication_total_failure_yields_error_sentinel() {
        let adj = parse_adjudication("completely unstructured prose", 4);
        assert_eq!(adj.verdict, AdjudicationVerdict::Error);
        assert_eq!(adj.iteration, 4);
        assert!(adj.bill_of_work.contains("Failed to parse adjudication"));
    }
}
