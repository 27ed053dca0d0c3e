//! 端到端场景：脚本化 LLM + 内存沙箱会话，覆盖一轮的完整状态机

use std::sync::Arc;

use comsol_agent::actions::{ActionStatus, FailureClass};
use comsol_agent::config::AppConfig;
use comsol_agent::core::AgentBuilder;
use comsol_agent::llm::ScriptedLlmClient;
use comsol_agent::memory::TurnOutcome;
use comsol_agent::session::{SandboxSession, SessionError};
use comsol_agent::snapshot::StudyStatus;
use comsol_agent::turn::{AutoConfirmer, ConversationOrchestrator};

struct Harness {
    llm: Arc<ScriptedLlmClient>,
    session: Arc<SandboxSession>,
    agent: ConversationOrchestrator,
}

async fn harness(responses: &[&str], approve: bool) -> Harness {
    let mut cfg = AppConfig::default();
    cfg.executor.backoff_base_ms = 1;
    cfg.executor.backoff_max_ms = 5;
    let llm = Arc::new(ScriptedLlmClient::with_responses(responses.iter().copied()));
    let session = Arc::new(SandboxSession::demo("scenario"));
    let confirmer = if approve {
        AutoConfirmer::approve_all()
    } else {
        AutoConfirmer::deny_all()
    };
    let agent = AgentBuilder::new(cfg)
        .with_llm(llm.clone())
        .with_session(session.clone())
        .with_confirmer(Arc::new(confirmer))
        .with_prompt_template("You are a COMSOL assistant.\n{context}")
        .connect()
        .await
        .unwrap();
    Harness { llm, session, agent }
}

fn mutating_calls(session: &SandboxSession) -> Vec<String> {
    session
        .calls()
        .into_iter()
        .filter(|c| c != "evaluate_expression")
        .collect()
}

#[tokio::test]
async fn set_parameter_then_solve_advances_revision_by_two() {
    let mut h = harness(
        &[r#"{"reply":"Setting L and solving.","actions":[
            {"action":"set_parameter","args":{"name":"L","value":"10[mm]"}},
            {"action":"solve_study","args":{"study":"Study 1"}}
        ]}"#],
        false,
    )
    .await;

    let reply = h.agent.submit_utterance("set L to 10 mm then solve Study 1").await;

    assert_eq!(h.agent.revision(), 2);
    let snap = h.agent.snapshot();
    assert_eq!(snap.parameters.get("L").map(String::as_str), Some("10[mm]"));
    assert_eq!(snap.study_status("Study 1"), Some(StudyStatus::Completed));
    assert!(reply.contains("Completed 2 action(s)"), "reply: {reply}");
    assert!(reply.contains("Study 1 is now: completed."), "reply: {reply}");
    assert!(reply.contains("Model revision: 2 (+2 this turn)."), "reply: {reply}");
    assert_eq!(h.session.calls(), vec!["set_parameter", "solve_study"]);
    assert_eq!(h.agent.snapshot(), &h.session.model());
}

#[tokio::test]
async fn solve_with_undefined_parameter_is_revised_then_rejected() {
    let solve = r#"{"reply":"Solving.","actions":[{"action":"solve_study","args":{"study":"Study 1"}}]}"#;
    let mut h = harness(&[solve, solve], false).await;

    let report = h
        .agent
        .run_turn("solve Study 1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Rejected);
    assert_eq!(report.revision, 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, ActionStatus::FailedValidation);
    assert!(report.reply.contains("No changes were made"), "reply: {}", report.reply);
    assert!(h.session.calls().is_empty());

    // 第二次请求带上了校验反馈
    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    let feedback = &requests[1].last().unwrap().content;
    assert!(feedback.contains("solve_study"), "feedback: {feedback}");
    assert!(feedback.contains('L'), "feedback: {feedback}");
}

#[tokio::test]
async fn revised_proposal_defining_parameter_succeeds() {
    let mut h = harness(
        &[
            r#"{"actions":[{"action":"solve_study","args":{"study":"Study 1"}}]}"#,
            r#"{"reply":"L was missing, defining it first.","actions":[
                {"action":"set_parameter","args":{"name":"L","value":"25[mm]"}},
                {"action":"solve_study","args":{"study":"Study 1"}}
            ]}"#,
        ],
        false,
    )
    .await;

    let report = h
        .agent
        .run_turn("solve Study 1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.revision, 2);
    assert!(report.results.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn denied_deletion_leaves_model_untouched() {
    let mut h = harness(
        &[r#"{"reply":"Deleting blk1.","actions":[{"action":"delete_feature","args":{"feature":"blk1"}}]}"#],
        false,
    )
    .await;

    let report = h
        .agent
        .run_turn("delete blk1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Denied);
    assert_eq!(report.revision, 0);
    assert_eq!(report.results[0].status, ActionStatus::Skipped);
    assert!(h.agent.snapshot().features.contains("blk1"));
    assert!(h.session.model().features.contains("blk1"));
    assert!(h.session.calls().is_empty());
    assert!(report.reply.contains("delete_feature"), "reply: {}", report.reply);
}

#[tokio::test]
async fn approved_deletion_runs() {
    let mut h = harness(
        &[r#"{"actions":[{"action":"delete_feature","args":{"feature":"cyl1"}}]}"#],
        true,
    )
    .await;

    let report = h
        .agent
        .run_turn("delete cyl1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.revision, 1);
    assert!(!h.agent.snapshot().features.contains("cyl1"));
    assert!(!h.session.model().features.contains("cyl1"));
}

#[tokio::test]
async fn self_confirmed_destructive_action_still_asks() {
    // 协作方输出中的 confirmed 字段不起作用
    let mut h = harness(
        &[r#"{"actions":[{"action":"delete_feature","args":{"feature":"blk1"},"confirmed":true}]}"#],
        false,
    )
    .await;

    let report = h
        .agent
        .run_turn("delete blk1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Denied);
    assert!(h.session.calls().is_empty());
}

#[tokio::test]
async fn independent_actions_run_after_failure_and_dependents_skip() {
    let mut h = harness(
        &[r#"{"actions":[
            {"action":"set_parameter","args":{"name":"L","value":"10[mm]"}},
            {"action":"set_parameter","args":{"name":"W","value":"5[mm]"}},
            {"action":"solve_study","args":{"study":"Study 1"}}
        ]}"#],
        false,
    )
    .await;
    h.session.inject_failure(
        "set_parameter",
        SessionError::Rejected("parameter table is locked".into()),
    );

    let report = h
        .agent
        .run_turn("set L and W then solve", h.agent.supervisor().begin_turn())
        .await;

    let statuses: Vec<ActionStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ActionStatus::FailedExecution,
            ActionStatus::Succeeded,
            ActionStatus::Skipped
        ]
    );
    assert_eq!(report.results[0].failure, Some(FailureClass::Permanent));
    assert_eq!(report.outcome, TurnOutcome::Partial);
    assert_eq!(report.revision, 1);
    assert!(!h.agent.snapshot().parameters.contains_key("L"));
    assert_eq!(h.agent.snapshot().parameters.get("W").map(String::as_str), Some("5[mm]"));
    assert!(report.reply.contains("1 of 3 action(s) succeeded"), "reply: {}", report.reply);
    // solve_study 从未到达会话
    assert_eq!(h.session.calls(), vec!["set_parameter", "set_parameter"]);
}

#[tokio::test]
async fn later_success_unblocks_dependents_of_failed_action() {
    let mut h = harness(
        &[r#"{"actions":[
            {"action":"set_parameter","args":{"name":"L","value":"10[mm]"}},
            {"action":"set_parameter","args":{"name":"L","value":"12[mm]"}},
            {"action":"solve_study","args":{"study":"Study 1"}}
        ]}"#],
        false,
    )
    .await;
    h.session.inject_failure(
        "set_parameter",
        SessionError::Rejected("value out of range".into()),
    );

    let report = h
        .agent
        .run_turn("set L, retry with 12 mm, then solve", h.agent.supervisor().begin_turn())
        .await;

    let statuses: Vec<ActionStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ActionStatus::FailedExecution,
            ActionStatus::Succeeded,
            ActionStatus::Succeeded
        ]
    );
    assert_eq!(report.outcome, TurnOutcome::Partial);
    assert_eq!(report.revision, 2);
    assert_eq!(h.agent.snapshot().parameters.get("L").map(String::as_str), Some("12[mm]"));
    assert_eq!(h.agent.snapshot().study_status("Study 1"), Some(StudyStatus::Completed));
    assert_eq!(h.session.calls(), vec!["set_parameter", "set_parameter", "solve_study"]);
}

#[tokio::test]
async fn revision_counts_only_successful_mutations() {
    let mut h = harness(
        &[r#"{"actions":[
            {"action":"solve_study","args":{"study":"Study 2"}},
            {"action":"evaluate_expression","args":{"expression":"T_in","unit":"K"}},
            {"action":"save_model","args":{"filename":"Demo_v2.mph"}},
            {"action":"refresh_context"}
        ]}"#],
        false,
    )
    .await;

    let report = h
        .agent
        .run_turn("solve study 2, evaluate inlet temperature and save", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    let mutating = report
        .results
        .iter()
        .filter(|r| r.is_success() && r.effect.is_mutating())
        .count() as u64;
    assert_eq!(mutating, 2);
    assert_eq!(report.revision, mutating);
    assert_eq!(report.results[1].value, Some(serde_json::json!(293.15)));
    assert_eq!(h.session.saved_files(), vec!["Demo_v2.mph"]);
}

#[tokio::test]
async fn queries_are_idempotent() {
    let evaluate = r#"{"actions":[{"action":"evaluate_expression","args":{"expression":"spf.U"}}]}"#;
    let mut h = harness(
        &[
            r#"{"actions":[{"action":"solve_study","args":{"study":"Study 2"}}]}"#,
            evaluate,
            evaluate,
        ],
        false,
    )
    .await;

    h.agent.submit_utterance("solve study 2").await;
    let before = h.agent.snapshot().clone();
    let revision = h.agent.revision();

    let first = h.agent.run_turn("evaluate velocity", h.agent.supervisor().begin_turn()).await;
    let second = h.agent.run_turn("evaluate velocity again", h.agent.supervisor().begin_turn()).await;

    assert_eq!(first.results[0].value, second.results[0].value);
    assert!(first.results[0].value.is_some());
    assert_eq!(h.agent.revision(), revision);
    assert_eq!(h.agent.snapshot(), &before);
    assert_eq!(mutating_calls(&h.session), vec!["solve_study"]);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let mut h = harness(
        &[r#"{"actions":[{"action":"build_mesh"}]}"#],
        false,
    )
    .await;
    h.session
        .inject_failure("build_mesh", SessionError::Busy("license in use".into()));

    let report = h
        .agent
        .run_turn("remesh", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.results[0].attempts, 2);
    assert!(report.reply.contains("after 2 attempts"), "reply: {}", report.reply);
    assert_eq!(report.revision, 1);
}

#[tokio::test]
async fn external_edit_is_detected_and_reconciled() {
    let mut h = harness(
        &[r#"{"actions":[{"action":"delete_feature","args":{"feature":"blk1"}}]}"#],
        true,
    )
    .await;
    // 用户在代理之外删除了 blk1
    h.session.mutate_externally(|m| {
        m.features.remove("blk1");
    });

    let report = h
        .agent
        .run_turn("delete blk1", h.agent.supervisor().begin_turn())
        .await;

    assert_eq!(report.results[0].status, ActionStatus::FailedExecution);
    assert_eq!(report.results[0].failure, Some(FailureClass::Drift));
    assert_eq!(report.revision, 0);
    assert!(!h.agent.snapshot().features.contains("blk1"));
    assert_eq!(h.agent.snapshot(), &h.session.model());
    assert!(report.reply.contains("re-synchronised"), "reply: {}", report.reply);
}

#[tokio::test]
async fn explicit_resync_reports_corrections() {
    let mut h = harness(&[], false).await;
    h.session.mutate_externally(|m| {
        m.parameters.insert("L".into(), "40[mm]".into());
    });

    let corrections = h.agent.resync().await.unwrap();

    assert!(!corrections.is_empty());
    assert!(corrections.iter().any(|c| c.contains('L')));
    assert_eq!(h.agent.snapshot().parameters.get("L").map(String::as_str), Some("40[mm]"));
    assert_eq!(h.agent.revision(), 0);
}

#[tokio::test]
async fn history_feeds_following_turns() {
    let mut h = harness(
        &[
            r#"{"reply":"Study 1 needs L and U_in.","actions":[]}"#,
            r#"{"reply":"Done.","actions":[{"action":"set_parameter","args":{"name":"L","value":"1[m]"}}]}"#,
        ],
        false,
    )
    .await;

    h.agent.submit_utterance("what does Study 1 need?").await;
    h.agent.submit_utterance("then set L to 1 m").await;

    assert_eq!(h.agent.history().len(), 2);
    let second = &h.llm.requests()[1];
    assert!(second.iter().any(|m| m.content.contains("what does Study 1 need?")));
    assert!(second.iter().any(|m| m.content.contains("Study 1 needs L and U_in.")));
}
