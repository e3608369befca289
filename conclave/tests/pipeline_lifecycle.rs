//! Lifecycle tests for the fixed pipeline: generate → critique → adjudicate
//! → refine, driven end-to-end through `execute_run` with scripted agents.

use conclave::core::types::Disposition;
use conclave::core::workflow::RefineMode;
use conclave::io::config::EscalationTrigger;
use conclave::io::state::load_state;
use conclave::io::store::load_json;
use conclave::session::execute_run;
use conclave::test_support::{ScriptedInvoker, TestRun, pipeline_config};
use serde_json::Value;

const TONE_CONSTRAINT: &str = r#"
id = "tone"
priority = 5
summary = "Plain, direct language throughout."

[[rules]]
id = "no-passive"
text = "Avoid passive voice."
default_severity = "HIGH"
"#;

fn pass_critique() -> String {
    r#"{"overall": "PASS", "issues": [], "summary": "clean"}"#.to_string()
}

fn high_issue_critique(id: &str) -> String {
    format!(
        r#"{{"overall": "FAIL", "issues": [{{"id": "{id}", "rule_id": "no-passive", "severity": "HIGH", "location": "para 1", "finding": "passive opening", "evidence": "it was decided", "confidence": 0.9}}], "summary": "one finding"}}"#
    )
}

fn rewrite_adjudication(issue_id: &str) -> String {
    format!(
        "=== ADJUDICATION ===\n{{\"status\": \"REWRITE\", \"decisions\": [{{\"issue_id\": \
         \"{issue_id}\", \"constraint\": \"tone\", \"severity\": \"HIGH\", \"status\": \
         \"pursuing\", \"guidance\": \"rewrite the opening\"}}]}}\n\
         === BILL_OF_WORK ===\n### Issue: {issue_id} (HIGH)\nReplace the passive opening.\n"
    )
}

/// Full lifecycle: one HIGH finding forces a rewrite, the refined artifact
/// passes, and the run resolves as approved.
///
/// This is also the concrete routing scenario: constraint `tone` routes to
/// critics `a` and `b`; `a` passes, `b` reports one HIGH issue; HIGH
/// dispositions to CONTINUE; adjudication sees exactly two critiques and
/// yields REWRITE with the issue id in the bill of work.
#[test]
fn pipeline_rewrites_once_then_approves() {
    let run = TestRun::new("launch-brief");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    config.dispositions.default.high = Disposition::Continue;
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "The launch brief, draft one.");
    invoker.respond("a", pass_critique());
    invoker.respond("b", high_issue_critique("tone-001"));
    invoker.respond("gen", rewrite_adjudication("tone-001"));
    invoker.respond("gen", "The launch brief, draft two, active voice.");
    invoker.respond("a", pass_critique());
    invoker.respond("b", pass_critique());

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.status, "done");

    let paths = run.paths();
    let final_artifact =
        std::fs::read_to_string(paths.final_dir.join("artifact.md")).expect("final artifact");
    assert_eq!(final_artifact, "The launch brief, draft two, active voice.");

    let resolution: Value = load_json(&paths.resolution_path).expect("resolution");
    assert_eq!(resolution["reason"], "approved");
    assert_eq!(resolution["final_index"], 2);

    // Both critiques were persisted for iteration 1.
    assert!(paths.critiques_dir(1).join("tone__a.json").exists());
    assert!(paths.critiques_dir(1).join("tone__b.json").exists());

    // The adjudicator saw both critiques: one clean, one with the issue.
    let adjudicator_prompt = &invoker.prompts_for("gen")[1];
    assert!(adjudicator_prompt.contains("tone-001"));
    assert!(adjudicator_prompt.contains("No issues found"));

    let adjudication: Value =
        load_json(&paths.iteration_dir(1).join("adjudication.json")).expect("adjudication");
    assert_eq!(adjudication["verdict"], "REWRITE");
    assert!(adjudication["bill_of_work"]
        .as_str()
        .expect("bill")
        .contains("tone-001"));

    // The refinement prompt carried the bill of work forward.
    let refine_prompt = &invoker.prompts_for("gen")[2];
    assert!(refine_prompt.contains("REFINING"));
    assert!(refine_prompt.contains("Replace the passive opening"));
}

/// A completed run re-invoked with the same name terminates immediately
/// with the recorded result and performs no agent invocations.
#[test]
fn completed_run_resumes_idempotently() {
    let run = TestRun::new("launch-brief");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "Draft.");
    invoker.respond("a", pass_critique());
    invoker.respond("b", pass_critique());
    let first = execute_run(&run.options(), Some(&invoker), None).expect("first run");
    assert_eq!(first.exit_code, 0);

    let replay = ScriptedInvoker::new();
    let second = execute_run(&run.options(), Some(&replay), None).expect("second run");
    assert_eq!(second.exit_code, 0);
    assert_eq!(second.summary, first.summary);
    assert_eq!(replay.call_count(), 0);
}

/// An issue pursued across three consecutive adjudications (threshold 2)
/// escalates to HITL at the third iteration's adjudication, not before.
#[test]
fn chronic_thrashing_escalates_at_third_adjudication() {
    let run = TestRun::new("thrashy");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    config.phases.critique_agents = vec!["a".to_string()];
    config.termination.escalate_on = vec![EscalationTrigger::Thrashing];
    config.max_iterations = 5;
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    for draft in ["draft one", "draft two", "draft three"] {
        invoker.respond("gen", draft);
        invoker.respond("a", high_issue_critique("tone-001"));
        invoker.respond("gen", rewrite_adjudication("tone-001"));
    }

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 10);
    assert_eq!(report.status, "awaiting_human");

    let paths = run.paths();
    let questions: Value = load_json(&paths.questions_path).expect("questions");
    // Escalated exactly at iteration 3: the run made it past iteration 2.
    assert_eq!(questions["turn"], 3);
    assert_eq!(questions["questions"][0]["agent"], "orchestrator");
    assert!(questions["questions"][0]["questions"][0]["question"]
        .as_str()
        .expect("question")
        .contains("tone-001"));
    assert!(paths.iteration_dir(2).join("adjudication.json").exists());

    let state = load_state(&paths.state_path);
    assert!(state.awaiting_human);

    // Answering the question resumes the run with the guidance injected.
    std::fs::write(
        &paths.answers_path,
        r#"{"answers": [{"question_id": "thrashing", "answer": "Drop the passive-voice rule for quotes."}]}"#,
    )
    .expect("write answers");

    let resumed = ScriptedInvoker::new();
    resumed.respond("gen", "draft four, reworked per guidance");
    resumed.respond("a", pass_critique());
    let report = execute_run(&run.options(), Some(&resumed), None).expect("resume");
    assert_eq!(report.exit_code, 0);

    // The answer file was archived, not deleted.
    assert!(!paths.answers_path.exists());
    let archived = std::fs::read_dir(&paths.hitl_dir)
        .expect("hitl dir")
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().ends_with(".processed.json"));
    assert!(archived);

    // The refinement prompt after resumption carries the human guidance.
    let refine_prompt = &resumed.prompts_for("gen")[0];
    assert!(refine_prompt.contains("HUMAN GUIDANCE"));
    assert!(refine_prompt.contains("passive-voice rule"));
}

/// Without a max-iterations escalation trigger, budget exhaustion exits
/// with the dedicated code and records an unresolved status.
#[test]
fn exhausted_iteration_budget_exits_with_budget_code() {
    let run = TestRun::new("stubborn");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    config.phases.critique_agents = vec!["a".to_string()];
    config.termination.escalate_on = Vec::new();
    config.max_iterations = 2;
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "draft one");
    invoker.respond("a", high_issue_critique("tone-001"));
    invoker.respond("gen", rewrite_adjudication("tone-001"));
    invoker.respond("gen", "draft two");
    invoker.respond("a", high_issue_critique("tone-002"));
    invoker.respond("gen", rewrite_adjudication("tone-002"));

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 11);
    assert_eq!(report.status, "max_budget");

    let paths = run.paths();
    let status = std::fs::read_to_string(paths.final_dir.join("status.md")).expect("status");
    assert!(status.contains("budget exhausted"));

    let result: Value = load_json(&paths.agent_result_path).expect("agent result");
    assert_eq!(result["exit_code"], 11);
    assert_eq!(result["status"], "max_budget");
}

/// Edit-mode refinements that never change the working copy burn the retry
/// budget and then escalate to HITL.
#[test]
fn unchanged_edit_refinement_escalates_after_retries() {
    let run = TestRun::new("frozen");
    let mut config = pipeline_config();
    // Default refine mode is edit; the scripted refiner acknowledges the
    // task but never touches the file.
    config.phases.critique_agents = vec!["a".to_string()];
    config.termination.escalate_on = Vec::new();
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "draft one");
    invoker.respond("a", high_issue_critique("tone-001"));
    invoker.respond("gen", rewrite_adjudication("tone-001"));
    for _ in 0..3 {
        invoker.respond("gen", "REFINEMENT COMPLETE");
    }

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 10);

    let questions: Value = load_json(&run.paths().questions_path).expect("questions");
    let question = questions["questions"][0]["questions"][0]["question"]
        .as_str()
        .expect("question");
    assert!(question.contains("byte-identical"));
    // Two retries were allowed before the third failure escalated.
    assert_eq!(invoker.prompts_for("gen").len(), 5);
    assert!(invoker.prompts_for("gen")[2].contains("REFINEMENT TASK"));
}

/// A pursuing CRITICAL decision flagged as conflicting with a competing
/// constraint escalates to HITL when the trigger is configured.
#[test]
fn conflicting_criticals_escalate_to_hitl() {
    let run = TestRun::new("tension");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    config.phases.critique_agents = vec!["a".to_string()];
    config.dispositions.default.critical = Disposition::Continue;
    config.termination.escalate_on = vec![EscalationTrigger::ConflictingCriticals];
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "draft one");
    invoker.respond(
        "a",
        r#"{"overall": "FAIL", "issues": [{"id": "tone-009", "rule_id": "no-passive", "severity": "CRITICAL", "location": "para 1", "finding": "legal wording must stay passive", "evidence": "per counsel", "confidence": 0.9}], "summary": "hard conflict"}"#.to_string(),
    );
    invoker.respond(
        "gen",
        "=== ADJUDICATION ===\n{\"status\": \"REWRITE\", \"decisions\": [{\"issue_id\": \
         \"tone-009\", \"constraint\": \"tone\", \"severity\": \"CRITICAL\", \"status\": \
         \"pursuing\", \"competing_constraint\": \"legal\"}]}\n\
         === BILL_OF_WORK ===\nUnresolvable without a policy call.\n"
            .to_string(),
    );

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 10);

    let questions: Value = load_json(&run.paths().questions_path).expect("questions");
    let question = questions["questions"][0]["questions"][0]["question"]
        .as_str()
        .expect("question");
    assert!(question.contains("tone-009"));
    assert!(question.contains("competing constraint"));
}

/// An unparseable critique surfaces to the adjudicator as an ERROR critique
/// instead of crashing the batch.
#[test]
fn unparseable_critique_reaches_the_adjudicator() {
    let run = TestRun::new("garbled");
    let mut config = pipeline_config();
    config.refine.mode = RefineMode::Rewrite;
    config.phases.critique_agents = vec!["a".to_string()];
    config.max_iterations = 1;
    config.termination.escalate_on = Vec::new();
    run.write_config(&config);
    run.write_goal("Write the launch brief.");
    run.write_constraint("tone.toml", TONE_CONSTRAINT);

    let invoker = ScriptedInvoker::new();
    invoker.respond("gen", "draft one");
    invoker.respond("a", "sorry, I cannot produce JSON today");
    invoker.respond("gen", rewrite_adjudication("tone-001"));

    let report = execute_run(&run.options(), Some(&invoker), None).expect("run");
    assert_eq!(report.exit_code, 11);

    let critique: Value =
        load_json(&run.paths().critiques_dir(1).join("tone__a.json")).expect("critique");
    assert_eq!(critique["overall"], "ERROR");
    assert!(critique["summary"]
        .as_str()
        .expect("summary")
        .contains("Failed to parse critique"));

    // The adjudicator was still consulted and saw the failed review.
    let adjudicator_prompt = &invoker.prompts_for("gen")[1];
    assert!(adjudicator_prompt.contains("a on tone"));
}
