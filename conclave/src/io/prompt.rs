//! Prompt assembly for each agent role.
//!
//! Plain string assembly, no templating engine: each builder states the
//! role, the inputs, and the exact output contract the parsers expect.

use std::fmt::Write as _;
use std::path::Path;

use crate::core::model::{Adjudication, Constraint, Critique};
use crate::io::thread::ThreadEntry;

/// Prompt for the generator phase (initial draft or full regeneration).
pub fn generator_prompt(
    goal: &str,
    source: &str,
    compressed_constraints: &str,
    previous_artifact: Option<&str>,
    previous_adjudication: Option<&Adjudication>,
    iteration: u32,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "SYSTEM CONTEXT");
    let _ = writeln!(
        prompt,
        "You are a generator agent in a reliable generation pipeline.\nIteration: {iteration}\n"
    );
    let _ = writeln!(prompt, "GOAL\n{}\n", goal.trim());
    if !source.is_empty() {
        let _ = writeln!(prompt, "SOURCE MATERIAL\n{}\n", source.trim());
    }
    if !compressed_constraints.is_empty() {
        let _ = writeln!(prompt, "CONSTRAINTS\n{compressed_constraints}\n");
    }

    match (previous_artifact, previous_adjudication) {
        (Some(artifact), Some(adjudication)) => {
            let _ = writeln!(
                prompt,
                "PREVIOUS ARTIFACT (ITERATION {})\n{artifact}\n",
                iteration.saturating_sub(1)
            );
            let _ = writeln!(prompt, "ADJUDICATION FEEDBACK\n{}\n", adjudication.bill_of_work);
            let _ = writeln!(
                prompt,
                "INSTRUCTIONS\nYou are REFINING the previous artifact. Apply ONLY the fixes \
                 specified in the bill of work.\nDo NOT introduce new content or restructure \
                 unless the feedback requires it."
            );
        }
        _ => {
            let _ = writeln!(
                prompt,
                "INSTRUCTIONS\nGenerate initial content that satisfies the goal while adhering \
                 to all constraints.\nBe thorough and complete."
            );
        }
    }
    let _ = writeln!(
        prompt,
        "\nOUTPUT\nProduce ONLY the artifact content (no JSON envelope, no explanations)."
    );
    prompt
}

/// Prompt for an edit-mode refinement pass: the agent edits the artifact
/// file in place instead of regenerating it.
pub fn refinement_prompt(
    artifact_path: &Path,
    adjudication: &Adjudication,
    goal: &str,
    iteration: u32,
) -> String {
    format!(
        "REFINEMENT TASK\nYou are refining an artifact based on adjudicator feedback.\n\
         Iteration: {iteration}\n\nGOAL (for context)\n{}\n\n\
         ARTIFACT LOCATION\nThe artifact to edit is at: {}\n\n\
         BILL OF WORK\n{}\n\n\
         INSTRUCTIONS\n\
         1. Read the artifact file.\n\
         2. For EACH issue in the bill of work, apply the exact change specified.\n\
         3. Do NOT add content beyond what is specified.\n\
         4. Do NOT restructure sections not mentioned in the bill of work.\n\
         5. When done, output \"REFINEMENT COMPLETE\".",
        goal.trim(),
        artifact_path.display(),
        adjudication.bill_of_work
    )
}

/// Prompt for one critic reviewing one constraint.
pub fn critic_prompt(constraint: &Constraint, artifact: &str, goal: &str, iteration: u32) -> String {
    let mut rules = String::new();
    for rule in &constraint.rules {
        let _ = writeln!(
            rules,
            "### Rule: {}\n{}\nDefault Severity: {}",
            rule.id, rule.text, rule.default_severity
        );
    }

    let mut sections = String::new();
    if let Some(script) = &constraint.script {
        let _ = writeln!(
            sections,
            "PRE-ANALYSIS SCRIPT\nRun this against the artifact before your analysis and treat \
             reported errors as findings:\n```\n{script}\n```\n"
        );
    }
    if !constraint.sources.is_empty() {
        let _ = writeln!(sections, "REFERENCE SOURCES\nRead these files for context:");
        for source in &constraint.sources {
            let _ = writeln!(sections, "- {source}");
        }
        let _ = writeln!(sections);
    }

    let goal_excerpt: String = goal.chars().take(500).collect();
    format!(
        "SYSTEM CONTEXT\nYou are a critic agent reviewing content for constraint: {id}\n\
         Iteration: {iteration}\n\n\
         CONSTRAINT: {id}\nPriority: {priority}\n\n{summary}\n\n\
         {sections}RULES TO EVALUATE\n{rules}\n\
         GOAL CONTEXT\n{goal_excerpt}\n\n\
         ARTIFACT TO REVIEW\n{artifact}\n\n\
         OUTPUT REQUIREMENTS\nRespond with a SINGLE JSON object:\n\
         {{\n  \"constraint_id\": \"{id}\",\n  \"overall\": \"PASS\" | \"FAIL\",\n\
           \"issues\": [{{\"id\": \"{id}-001\", \"rule_id\": \"...\", \
         \"severity\": \"CRITICAL\" | \"HIGH\" | \"MEDIUM\" | \"LOW\", \"location\": \"...\", \
         \"finding\": \"...\", \"evidence\": \"...\", \"suggested_fix\": \"...\", \
         \"confidence\": 0.9}}],\n  \"approved_sections\": [],\n  \"summary\": \"...\"\n}}\n\
         If no issues are found, return overall \"PASS\" with an empty issues array.",
        id = constraint.id,
        priority = constraint.priority,
        summary = constraint.summary.trim(),
    )
}

/// Prompt for the adjudicator over a set of critiques.
pub fn adjudicator_prompt(
    constraints: &[&Constraint],
    artifact: &str,
    critiques: &[Critique],
    goal: &str,
    iteration: u32,
    max_iterations: u32,
) -> String {
    let mut constraints_section = String::new();
    for c in constraints {
        let summary: String = c.summary.chars().take(100).collect();
        let _ = writeln!(constraints_section, "- {} (priority {}): {summary}", c.id, c.priority);
    }

    let mut critiques_section = String::new();
    for critique in critiques {
        let _ = writeln!(
            critiques_section,
            "### {} on {}: {:?}",
            critique.reviewer, critique.constraint_id, critique.overall
        );
        if critique.issues.is_empty() {
            let _ = writeln!(critiques_section, "  No issues found");
        }
        for issue in &critique.issues {
            let _ = writeln!(
                critiques_section,
                "  - [{}] {}: {}",
                issue.severity, issue.id, issue.finding
            );
        }
    }

    format!(
        "SYSTEM CONTEXT\nYou are the adjudicator in a reliable generation pipeline.\n\
         Your role is to find the optimal boundary between competing constraints.\n\
         Iteration: {iteration}/{max_iterations}\n\n\
         GOAL\n{goal}\n\n\
         CONSTRAINTS (ordered by priority)\n{constraints_section}\n\
         ARTIFACT UNDER REVIEW\n{artifact}\n\n\
         CRITIQUES FROM ALL REVIEWERS\n{critiques_section}\n\
         YOUR ROLE\n\
         1. Analyze tensions between competing constraints.\n\
         2. Decide which issues to pursue vs dismiss.\n\
         3. Produce a precise, surgical bill of work for the generator.\n\n\
         OUTPUT FORMAT\nUse this exact two-section format. Do NOT put bill_of_work inside the JSON.\n\n\
         === ADJUDICATION ===\n\
         {{\n  \"iteration\": {iteration},\n  \"status\": \"REWRITE\" | \"APPROVED\",\n\
           \"tension_analysis\": [],\n\
           \"decisions\": [{{\"issue_id\": \"...\", \"constraint\": \"...\", \
         \"severity\": \"CRITICAL|HIGH|MEDIUM|LOW\", \"status\": \"pursuing\" | \"dismissed\", \
         \"flagged_by\": [], \"competing_constraint\": null, \"guidance\": \"...\"}}]\n}}\n\n\
         === BILL_OF_WORK ===\n\
         (Raw markdown with surgical edit instructions referencing issue ids)\n\n\
         APPROVAL CRITERIA\nStatus is APPROVED only when no CRITICAL and no HIGH issues are pursuing.",
        goal = goal.trim(),
    )
}

/// Prompt for one conversational turn.
#[allow(clippy::too_many_arguments)]
pub fn conversation_prompt(
    agent_name: &str,
    pattern: &str,
    turn_idx: u32,
    max_turns: u32,
    goal: &str,
    context: &str,
    thread_tail: &[ThreadEntry],
    truncate_chars: usize,
    hitl_answers: Option<&serde_json::Value>,
    enable_research: bool,
    experts: &[String],
) -> String {
    let mut thread_text = String::new();
    for entry in thread_tail {
        let content: String = entry.content.chars().take(truncate_chars).collect();
        let _ = writeln!(
            thread_text,
            "[{}|{}] {content}",
            entry.agent,
            entry.status.as_deref().unwrap_or("?")
        );
    }
    if thread_text.is_empty() {
        thread_text = "(start of conversation)\n".to_string();
    }

    let mut extras = String::new();
    if !experts.is_empty() {
        let _ = writeln!(extras, "ASSIGNED EXPERT PERSPECTIVES\n{}\n", experts.join(", "));
    }
    if let Some(answers) = hitl_answers {
        let _ = writeln!(
            extras,
            "HUMAN ANSWERS TO PREVIOUS QUESTIONS\n{}\n",
            serde_json::to_string_pretty(answers).unwrap_or_default()
        );
    }
    let research_hint = if enable_research {
        "\n- If you need web research, set status=\"needs_research\" with research_topics"
    } else {
        ""
    };

    format!(
        "SYSTEM CONTEXT\nYou are agent \"{agent_name}\" in a multi-agent orchestration system.\n\
         Pattern: {pattern} | Turn: {turn_idx}/{max_turns}\n\n\
         GOAL\n{goal}\n\n\
         SHARED CONTEXT\n{context}\n\n\
         CONVERSATION THREAD (recent)\n{thread_text}\n{extras}\
         OUTPUT REQUIREMENTS\nRespond with a SINGLE JSON object:\n\
         {{\n  \"status\": \"ok\" | \"needs_human\" | \"needs_research\" | \"done\" | \"error\",\n\
           \"message\": \"your response\",\n\
           \"questions\": [{{\"id\": \"q1\", \"question\": \"...\", \"priority\": \
         \"critical|high|normal\", \"required\": true}}],\n\
           \"research_topics\": [],\n\
           \"artifacts\": [{{\"path\": \"relative/path\", \"description\": \"...\"}}],\n\
           \"confidence\": 0.0,\n  \"agrees_with\": []\n}}\n\n\
         - If you need human clarification, set status=\"needs_human\" with questions\n\
         - If the goal is fully satisfied, set status=\"done\"\n\
         - Use agrees_with to indicate consensus with other agents{research_hint}",
        goal = goal.trim(),
        context = if context.trim().is_empty() { "(none)" } else { context.trim() },
    )
}

/// Prompt for a mid-run research request.
pub fn research_prompt(topics: &[String], goal: &str) -> String {
    let goal_excerpt: String = goal.chars().take(500).collect();
    let mut topic_lines = String::new();
    for topic in topics {
        let _ = writeln!(topic_lines, "- {topic}");
    }
    format!(
        "You are a focused researcher. Research the following topics thoroughly.\n\n\
         GOAL CONTEXT:\n{goal_excerpt}\n\n\
         RESEARCH TOPICS:\n{topic_lines}\n\
         Provide findings as a structured list with sources. Be thorough but concise."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ConstraintRule;

    #[test]
    fn generator_prompt_switches_to_refinement_with_feedback() {
        let adj = Adjudication {
            bill_of_work: "### Issue: tone-001".to_string(),
            ..Adjudication::default()
        };
        let prompt = generator_prompt("the goal", "", "", Some("old draft"), Some(&adj), 2);
        assert!(prompt.contains("REFINING"));
        assert!(prompt.contains("tone-001"));
        assert!(prompt.contains("PREVIOUS ARTIFACT (ITERATION 1)"));

        let initial = generator_prompt("the goal", "", "", None, None, 1);
        assert!(initial.contains("Generate initial content"));
    }

    #[test]
    fn critic_prompt_carries_rules_and_severities() {
        let constraint = Constraint {
            id: "tone".to_string(),
            priority: 5,
            summary: "Plain language.".to_string(),
            rules: vec![ConstraintRule {
                id: "no-passive".to_string(),
                text: "Avoid passive voice.".to_string(),
                default_severity: crate::core::types::Severity::Medium,
            }],
            ..Constraint::default()
        };
        let prompt = critic_prompt(&constraint, "the artifact", "the goal", 1);
        assert!(prompt.contains("constraint: tone"));
        assert!(prompt.contains("### Rule: no-passive"));
        assert!(prompt.contains("Default Severity: MEDIUM"));
        assert!(prompt.contains("the artifact"));
    }

    #[test]
    fn adjudicator_prompt_uses_two_section_contract() {
        let prompt = adjudicator_prompt(&[], "artifact", &[], "goal", 1, 3);
        assert!(prompt.contains("=== ADJUDICATION ==="));
        assert!(prompt.contains("=== BILL_OF_WORK ==="));
    }

    #[test]
    fn conversation_prompt_includes_recent_thread() {
        let mut entry = ThreadEntry::new("critic-a", "assistant", "previous point");
        entry.status = Some("ok".to_string());
        let prompt = conversation_prompt(
            "critic-b", "sequential", 2, 6, "goal", "", &[entry], 2000, None, false, &[],
        );
        assert!(prompt.contains("[critic-a|ok] previous point"));
        assert!(prompt.contains("agent \"critic-b\""));
    }
}
