//! Consensus detection over one round of parallel envelopes.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::model::Envelope;
use crate::core::similarity::text_similarity;
use crate::core::types::EnvelopeStatus;

/// Minimum agents that must agree for consensus.
pub const DEFAULT_MIN_AGREE: usize = 2;

/// Pairwise message similarity above which two agents are clustered as
/// agreeing when no explicit agreement set is declared.
const MESSAGE_SIMILARITY_BAR: f64 = 0.85;

/// Check whether the round's envelopes constitute consensus.
///
/// Fails immediately if any envelope reports `error` or `needs_human`.
/// Explicit agreement: an envelope's declared agreement set, unioned with
/// its own author, reaching `min_agree` members among the current
/// participants counts. Fallback: pairwise message-similarity clustering.
pub fn check_consensus(envelopes: &BTreeMap<String, Envelope>, min_agree: usize) -> bool {
    if envelopes.len() < 2 {
        return false;
    }
    if envelopes
        .values()
        .any(|e| matches!(e.status, EnvelopeStatus::Error | EnvelopeStatus::NeedsHuman))
    {
        return false;
    }

    let participants: BTreeSet<&str> = envelopes.keys().map(String::as_str).collect();
    for (agent, env) in envelopes {
        if env.agrees_with.is_empty() {
            continue;
        }
        let mut agreers: BTreeSet<&str> = env
            .agrees_with
            .iter()
            .map(String::as_str)
            .filter(|a| participants.contains(a))
            .collect();
        agreers.insert(agent.as_str());
        if agreers.len() >= min_agree {
            return true;
        }
    }

    let messages: Vec<&str> = envelopes.values().map(|e| e.message.as_str()).collect();
    for (i, a) in messages.iter().enumerate() {
        let mut similar = 1usize;
        for (j, b) in messages.iter().enumerate() {
            if i != j && text_similarity(a, b) > MESSAGE_SIMILARITY_BAR {
                similar += 1;
            }
        }
        if similar >= min_agree {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(status: EnvelopeStatus, message: &str, agrees: &[&str]) -> Envelope {
        Envelope {
            status,
            message: message.to_string(),
            agrees_with: agrees.iter().map(|s| s.to_string()).collect(),
            ..Envelope::default()
        }
    }

    fn round(entries: Vec<(&str, Envelope)>) -> BTreeMap<String, Envelope> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn explicit_agreement_reaches_consensus() {
        let envelopes = round(vec![
            ("a", env(EnvelopeStatus::Ok, "plan alpha", &["b"])),
            ("b", env(EnvelopeStatus::Ok, "something else entirely", &[])),
        ]);
        assert!(check_consensus(&envelopes, 2));
    }

    #[test]
    fn agreement_with_non_participant_does_not_count() {
        let envelopes = round(vec![
            ("a", env(EnvelopeStatus::Ok, "plan alpha", &["ghost"])),
            ("b", env(EnvelopeStatus::Ok, "unrelated counterplan beta", &[])),
        ]);
        assert!(!check_consensus(&envelopes, 2));
    }

    #[test]
    fn similar_messages_reach_consensus_without_declaration() {
        let envelopes = round(vec![
            ("a", env(EnvelopeStatus::Ok, "we should ship the migration on tuesday", &[])),
            ("b", env(EnvelopeStatus::Ok, "we should ship the migration on tuesday", &[])),
        ]);
        assert!(check_consensus(&envelopes, 2));
    }

    #[test]
    fn error_status_blocks_consensus() {
        let envelopes = round(vec![
            ("a", env(EnvelopeStatus::Ok, "plan alpha", &["b"])),
            ("b", env(EnvelopeStatus::Error, "plan alpha", &["a"])),
        ]);
        assert!(!check_consensus(&envelopes, 2));
    }

    #[test]
    fn needs_human_blocks_consensus() {
        let envelopes = round(vec![
            ("a", env(EnvelopeStatus::NeedsHuman, "plan alpha", &["b"])),
            ("b", env(EnvelopeStatus::Ok, "plan alpha", &["a"])),
        ]);
        assert!(!check_consensus(&envelopes, 2));
    }
}
