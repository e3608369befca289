//! Stagnation detection over recent conversation history.

use crate::core::similarity::text_similarity;

/// Default similarity ratio above which two consecutive messages from the
/// same agent count as "no progress".
pub const DEFAULT_STAGNATION_THRESHOLD: f64 = 0.90;

/// Detect whether the conversation has stopped making progress.
///
/// `recent` is (agent, message) pairs ordered newest first. For each named
/// agent, its two most recent messages are compared; stagnation holds only
/// if every agent with at least two messages scores at or above `threshold`
/// and at least two agents have that much history. A single participating
/// agent never stagnates (self-similarity is expected there).
pub fn detect_stagnation(recent: &[(String, String)], agents: &[String], threshold: f64) -> bool {
    if agents.len() < 2 {
        return false;
    }

    let mut per_agent: Vec<(&String, Vec<&str>)> = agents.iter().map(|a| (a, Vec::new())).collect();
    for (agent, content) in recent {
        if let Some((_, msgs)) = per_agent.iter_mut().find(|(a, _)| *a == agent)
            && msgs.len() < 2
        {
            msgs.push(content.as_str());
        }
    }

    let with_history: Vec<&Vec<&str>> = per_agent
        .iter()
        .filter(|(_, msgs)| msgs.len() >= 2)
        .map(|(_, msgs)| msgs)
        .collect();
    if with_history.len() < 2 {
        return false;
    }

    with_history
        .iter()
        .all(|msgs| text_similarity(msgs[0], msgs[1]) >= threshold)
}
