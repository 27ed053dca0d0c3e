//! 对话编排器：一轮的状态机
//!
//! Idle → AwaitingProposal → Validating → [AwaitingConfirmation] → Executing → Summarizing → Idle
//!
//! - 校验在投影快照上进行：前序动作的预期变化先叠加，再检查后续动作（「先设 L 再求解」可以通过）。
//! - 校验失败时最多向协作方请求 max_revisions 次修订，仍失败则本轮中止，不执行任何动作。
//! - 破坏性动作逐个请求用户确认；任何一个被拒绝则整轮中止。
//! - 执行严格按提案顺序，不在首个失败处短路；依赖失败动作产出的后续动作被跳过。
//!   每个动作执行前针对真实快照重新校验，不通过则跳过。
//! - 取消只在动作之间生效；等待提案或确认时立即生效。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::actions::{
    ActionExecutor, ActionRegistry, ActionRequest, ActionResult, ActionStatus, EffectClass,
    FailureClass, ValidationError, Validator,
};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, SessionSupervisor, TurnPhase, UiState};
use crate::memory::{ConversationTurn, TurnHistory, TurnOutcome};
use crate::snapshot::{ModelSnapshot, SessionStateTracker, StateKey};
use crate::turn::narrative::{narrate, TurnSummary};
use crate::turn::{
    ConfirmationDecision, ConfirmationRequest, Confirmer, Proposal, ProposalRequest, Proposer,
    TurnEvent,
};

/// 轮次上限设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_revisions: u32,
    pub max_parse_retries: u32,
    pub max_history_turns: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_revisions: 1,
            max_parse_retries: 1,
            max_history_turns: 20,
        }
    }
}

/// 一轮的完整结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub reply: String,
    pub outcome: TurnOutcome,
    pub results: Vec<ActionResult>,
    /// 本轮结束时的修订号
    pub revision: u64,
    pub error: Option<String>,
}

/// Validating 阶段的产出
struct ValidatedPlan {
    actions: Vec<ActionRequest>,
    /// 需要确认的破坏性动作下标
    destructive: Vec<usize>,
}

/// 对话编排器；快照跟踪器只由它持有和修改
pub struct ConversationOrchestrator {
    registry: Arc<ActionRegistry>,
    validator: Validator,
    executor: Arc<ActionExecutor>,
    proposer: Arc<dyn Proposer>,
    confirmer: Arc<dyn Confirmer>,
    recovery: RecoveryEngine,
    tracker: SessionStateTracker,
    history: TurnHistory,
    settings: OrchestratorSettings,
    supervisor: Arc<SessionSupervisor>,
    phase: TurnPhase,
    last_error: Option<String>,
    events: Option<broadcast::Sender<TurnEvent>>,
    status: Option<watch::Sender<UiState>>,
}

impl ConversationOrchestrator {
    pub fn new(
        registry: Arc<ActionRegistry>,
        proposer: Arc<dyn Proposer>,
        executor: Arc<ActionExecutor>,
        confirmer: Arc<dyn Confirmer>,
        initial: ModelSnapshot,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            validator: Validator::new(registry.clone()),
            registry,
            executor,
            proposer,
            confirmer,
            recovery: RecoveryEngine::new(),
            tracker: SessionStateTracker::new(initial),
            history: TurnHistory::new(settings.max_history_turns),
            settings,
            supervisor: Arc::new(SessionSupervisor::new()),
            phase: TurnPhase::Idle,
            last_error: None,
            events: None,
            status: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_status(mut self, status: watch::Sender<UiState>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<SessionSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        self.supervisor.clone()
    }

    pub fn snapshot(&self) -> &ModelSnapshot {
        self.tracker.current()
    }

    pub fn revision(&self) -> u64 {
        self.tracker.revision()
    }

    /// 协作方累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.proposer.token_usage()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn history(&self) -> &TurnHistory {
        &self.history
    }

    /// 清空历史；快照与修订号保留
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.last_error = None;
        self.publish_status(None);
    }

    /// 展示层入口：提交一句话，返回回复文本
    pub async fn submit_utterance(&mut self, text: &str) -> String {
        let cancel = self.supervisor.begin_turn();
        self.run_turn(text, cancel).await.reply
    }

    /// 重新读取外部模型并校正快照，返回校正的差异
    pub async fn resync(&mut self) -> Result<Vec<String>, AgentError> {
        let external = self
            .executor
            .read_snapshot()
            .await
            .map_err(|e| AgentError::Drift(format!("could not re-read the live model: {e}")))?;
        let corrections = self.tracker.reconcile(external);
        self.emit(TurnEvent::Resynced {
            corrections: corrections.clone(),
        });
        self.publish_status(None);
        Ok(corrections)
    }

    /// 执行一轮
    pub async fn run_turn(&mut self, utterance: &str, cancel: CancellationToken) -> TurnReport {
        self.last_error = None;
        let mut feedback: Vec<String> = Vec::new();
        let mut revisions_left = self.settings.max_revisions;
        let mut parse_retries_left = self.settings.max_parse_retries;

        // AwaitingProposal / Validating，含修订往返
        let (proposal, plan) = loop {
            self.set_phase(TurnPhase::AwaitingProposal);
            let request = ProposalRequest {
                history: self.history.as_messages(),
                snapshot_summary: self.context_summary(),
                utterance: utterance.to_string(),
                feedback: feedback.clone(),
            };
            let proposed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish_cancelled(utterance, Vec::new(), Vec::new());
                }
                r = self.proposer.propose(&request) => r,
            };
            let proposal = match proposed {
                Ok(p) => p,
                Err(err) => {
                    let retry = parse_retries_left > 0;
                    match self.recovery.handle(&err, revisions_left) {
                        RecoveryAction::RetryWithPrompt(prompt) if retry => {
                            parse_retries_left -= 1;
                            tracing::warn!(error = %err, "unparseable proposal, re-prompting");
                            self.emit(TurnEvent::Recovery {
                                action: "retry_with_prompt".into(),
                                detail: err.to_string(),
                            });
                            feedback.push(prompt);
                            continue;
                        }
                        RecoveryAction::Report(msg) => {
                            return self.finish_error(utterance, Vec::new(), msg, &err);
                        }
                        _ => {
                            let msg = format!(
                                "I could not understand the language service's answer ({err}). No changes were made to the model."
                            );
                            return self.finish_error(utterance, Vec::new(), msg, &err);
                        }
                    }
                }
            };
            self.emit(TurnEvent::Proposal {
                reply: proposal.reply.clone(),
                actions: proposal.actions.iter().map(ActionRequest::label).collect(),
            });
            if proposal.is_conversational() {
                return self.finish_conversational(utterance, proposal);
            }

            self.set_phase(TurnPhase::Validating);
            match self.validate_plan(&proposal.actions) {
                Ok(plan) => break (proposal, plan),
                Err((index, verr)) => {
                    let err = AgentError::Validation(verr.clone());
                    match self.recovery.handle(&err, revisions_left) {
                        RecoveryAction::ReviseProposal(prompt) => {
                            revisions_left -= 1;
                            tracing::info!(action = %verr.action(), reason = %verr, "proposal rejected, requesting revision");
                            self.emit(TurnEvent::ValidationFailed {
                                action: verr.action().to_string(),
                                reason: verr.to_string(),
                                revising: true,
                            });
                            feedback.push(prompt);
                            continue;
                        }
                        action => {
                            self.emit(TurnEvent::ValidationFailed {
                                action: verr.action().to_string(),
                                reason: verr.to_string(),
                                revising: false,
                            });
                            let msg = match action {
                                RecoveryAction::Report(m) => m,
                                _ => err.to_string(),
                            };
                            let rejected = vec![ActionResult::failed_validation(
                                &proposal.actions[index],
                                verr.to_string(),
                            )];
                            return self.finish_with(
                                utterance,
                                proposal.actions,
                                rejected,
                                msg,
                                TurnOutcome::Rejected,
                                Some(err.to_string()),
                            );
                        }
                    }
                }
            }
        };

        let mut actions = plan.actions;

        // AwaitingConfirmation
        if !plan.destructive.is_empty() {
            self.set_phase(TurnPhase::AwaitingConfirmation);
            for &i in &plan.destructive {
                let Some(spec) = self.registry.lookup(&actions[i].action) else {
                    continue;
                };
                let request = ConfirmationRequest::for_action(&actions[i], spec);
                let decision = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return self.finish_cancelled(utterance, actions, Vec::new());
                    }
                    d = self.confirmer.confirm(&request) => d,
                };
                match decision {
                    ConfirmationDecision::Approve => actions[i].confirmed = true,
                    ConfirmationDecision::Deny => {
                        let err = AgentError::ConfirmationDenied(request.label.clone());
                        let msg = match self.recovery.handle(&err, 0) {
                            RecoveryAction::Report(m) => m,
                            _ => err.to_string(),
                        };
                        let results = actions
                            .iter()
                            .map(|a| ActionResult::skipped(a, "confirmation denied".to_string()))
                            .collect();
                        return self.finish_with(
                            utterance,
                            actions,
                            results,
                            msg,
                            TurnOutcome::Denied,
                            Some(err.to_string()),
                        );
                    }
                }
            }
        }

        // Executing
        self.set_phase(TurnPhase::Executing);
        let revision_before = self.tracker.revision();
        let mut results: Vec<ActionResult> = Vec::with_capacity(actions.len());
        let mut unavailable: HashSet<StateKey> = HashSet::new();
        let mut corrections: Vec<String> = Vec::new();
        let mut drift: Option<String> = None;
        let mut cancelled = false;

        for request in &actions {
            let Some(spec) = self.registry.lookup(&request.action) else {
                results.push(ActionResult::failed_validation(
                    request,
                    ValidationError::UnknownAction(request.action.clone()).to_string(),
                ));
                continue;
            };
            let kind = spec.kind;
            if cancel.is_cancelled() {
                cancelled = true;
                results.push(self.skip(request, "turn cancelled before this action ran".into()));
                continue;
            }

            let requires = kind.requires(request, self.tracker.current());
            if let Some(missing) = requires.iter().find(|k| unavailable.contains(*k)) {
                let reason = format!("depends on {missing}, which an earlier action failed to produce");
                unavailable.extend(kind.produces(request));
                results.push(self.skip(request, reason));
                continue;
            }

            let validated = match self.validator.validate(request.clone(), self.tracker.current()) {
                Ok(v) => v,
                Err(e) => {
                    unavailable.extend(kind.produces(request));
                    results.push(self.skip(request, format!("no longer valid against the live model: {e}")));
                    continue;
                }
            };

            self.emit(TurnEvent::ActionStarted {
                label: request.label(),
            });
            self.publish_status(Some(request.label()));
            let mut result = self.executor.execute(validated).await;
            self.tracker.apply(&result);
            result.revision = self.tracker.revision();

            if let Some(observed) = result.observed.take() {
                corrections.extend(self.tracker.reconcile(observed));
            }
            if result.is_success() {
                // 后续动作重新产出了同一状态，依赖它的动作可以继续
                for key in kind.produces(request) {
                    unavailable.remove(&key);
                }
            } else {
                unavailable.extend(kind.produces(request));
                if result.failure == Some(FailureClass::Drift) {
                    let err = AgentError::Drift(format!("{} left the live model in an unknown state", result.action));
                    if let RecoveryAction::Resync = self.recovery.handle(&err, 0) {
                        match self.executor.read_snapshot().await {
                            Ok(external) => {
                                corrections.extend(self.tracker.reconcile(external));
                                result.revision = self.tracker.revision();
                            }
                            Err(e) => {
                                let err = AgentError::Drift(format!("{}; re-reading the live model failed: {e}", result.action));
                                tracing::warn!(error = %err, "drift could not be reconciled");
                                drift = Some(err.to_string());
                            }
                        }
                    }
                }
            }
            self.emit_finished(&result);
            results.push(result);
        }

        // Summarizing
        self.set_phase(TurnPhase::Summarizing);
        if !corrections.is_empty() {
            self.emit(TurnEvent::Resynced {
                corrections: corrections.clone(),
            });
        }
        let mut reply = narrate(&TurnSummary {
            reply: proposal.reply.as_deref(),
            results: &results,
            snapshot: self.tracker.current(),
            revision_before,
            revision_after: self.tracker.revision(),
            corrections: &corrections,
            drift: drift.as_deref(),
        });
        let outcome = if cancelled {
            reply.push_str("\nThe turn was cancelled; remaining actions were not run.");
            TurnOutcome::Cancelled
        } else {
            TurnOutcome::from_results(&results)
        };
        let error = drift.or_else(|| {
            results
                .iter()
                .find(|r| !r.is_success())
                .and_then(|r| r.error.clone())
        });
        self.finish_with(utterance, actions, results, reply, outcome, error)
    }

    /// 在投影快照上依次校验；返回需要确认的破坏性动作
    fn validate_plan(
        &self,
        actions: &[ActionRequest],
    ) -> Result<ValidatedPlan, (usize, ValidationError)> {
        let mut projected = self.tracker.current().clone();
        let mut destructive = Vec::new();
        for (i, request) in actions.iter().enumerate() {
            let spec = match self.validator.check(request, &projected) {
                Ok(spec) => spec,
                Err(ValidationError::ConfirmationRequired { .. }) => {
                    destructive.push(i);
                    // 前面已检查过 (a)-(c)
                    match self.registry.lookup(&request.action) {
                        Some(spec) => spec,
                        None => return Err((i, ValidationError::UnknownAction(request.action.clone()))),
                    }
                }
                Err(e) => return Err((i, e)),
            };
            if spec.effect != EffectClass::Query {
                projected.apply(&spec.kind.expected_delta(request));
            }
        }
        Ok(ValidatedPlan {
            actions: actions.to_vec(),
            destructive,
        })
    }

    fn context_summary(&self) -> String {
        format!(
            "Session: {}\nModel revision: {}\n\n{}",
            self.executor.session_name(),
            self.tracker.revision(),
            self.tracker.current().summary()
        )
    }

    fn skip(&self, request: &ActionRequest, reason: String) -> ActionResult {
        tracing::info!(action = %request.action, reason = %reason, "action skipped");
        self.emit(TurnEvent::ActionSkipped {
            label: request.label(),
            reason: reason.clone(),
        });
        let mut result = ActionResult::skipped(request, reason);
        result.revision = self.tracker.revision();
        result
    }

    fn emit_finished(&self, result: &ActionResult) {
        let detail = if result.status == ActionStatus::Succeeded {
            result.message.clone()
        } else {
            result.error.clone()
        };
        self.emit(TurnEvent::ActionFinished {
            label: result.label.clone(),
            status: result.status.as_str().to_string(),
            detail,
            revision: result.revision,
        });
    }

    fn finish_conversational(&mut self, utterance: &str, proposal: Proposal) -> TurnReport {
        let reply = proposal
            .reply
            .unwrap_or_else(|| "I have no changes to make to the model for that.".to_string());
        self.finish_with(
            utterance,
            Vec::new(),
            Vec::new(),
            reply,
            TurnOutcome::Conversational,
            None,
        )
    }

    fn finish_cancelled(
        &mut self,
        utterance: &str,
        proposed: Vec<ActionRequest>,
        results: Vec<ActionResult>,
    ) -> TurnReport {
        let err = AgentError::Cancelled;
        tracing::info!(phase = %self.phase, "turn cancelled");
        self.finish_with(
            utterance,
            proposed,
            results,
            "Cancelled. No changes were made to the model.".to_string(),
            TurnOutcome::Cancelled,
            Some(err.to_string()),
        )
    }

    fn finish_error(
        &mut self,
        utterance: &str,
        proposed: Vec<ActionRequest>,
        reply: String,
        err: &AgentError,
    ) -> TurnReport {
        tracing::warn!(error = %err, "turn failed before execution");
        self.emit(TurnEvent::Error {
            text: err.to_string(),
        });
        self.finish_with(
            utterance,
            proposed,
            Vec::new(),
            reply,
            TurnOutcome::Failed,
            Some(err.to_string()),
        )
    }

    fn finish_with(
        &mut self,
        utterance: &str,
        proposed: Vec<ActionRequest>,
        results: Vec<ActionResult>,
        reply: String,
        outcome: TurnOutcome,
        error: Option<String>,
    ) -> TurnReport {
        self.history.push(ConversationTurn::new(
            utterance,
            proposed,
            results.clone(),
            reply.clone(),
            outcome,
        ));
        self.last_error = error.clone();
        self.emit(TurnEvent::Reply {
            text: reply.clone(),
        });
        self.set_phase(TurnPhase::Idle);
        TurnReport {
            reply,
            outcome,
            results,
            revision: self.tracker.revision(),
            error,
        }
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, revision = self.tracker.revision(), "phase");
            self.phase = phase;
            self.emit(TurnEvent::PhaseChanged { phase });
        }
        self.publish_status(None);
    }

    fn publish_status(&self, active_action: Option<String>) {
        if let Some(status) = &self.status {
            status.send_replace(UiState {
                phase: self.phase,
                revision: self.tracker.revision(),
                turns: self.history.len(),
                active_action,
                input_locked: self.phase != TurnPhase::Idle,
                error_message: self.last_error.clone(),
            });
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use crate::actions::RetryPolicy;
    use crate::llm::ScriptedLlmClient;
    use crate::session::{SandboxSession, SessionError, SessionOutcome, SimulationSession};
    use crate::turn::{AutoConfirmer, ConfirmationDecision, ConfirmationRequest, Confirmer, LlmProposer};

    fn orchestrator_over(
        session: Arc<dyn SimulationSession>,
        initial: ModelSnapshot,
        responses: &[&str],
        confirmer: Arc<dyn Confirmer>,
    ) -> (ConversationOrchestrator, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(ScriptedLlmClient::with_responses(responses.iter().copied()));
        let registry = Arc::new(ActionRegistry::builtin().unwrap());
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(1),
        };
        let executor = Arc::new(ActionExecutor::new(session, policy, Duration::from_secs(5)));
        let orch = ConversationOrchestrator::new(
            registry,
            Arc::new(LlmProposer::new(llm.clone(), "system {context}")),
            executor,
            confirmer,
            initial,
            OrchestratorSettings::default(),
        );
        (orch, llm)
    }

    fn orchestrator(
        responses: &[&str],
        confirmer: AutoConfirmer,
    ) -> (ConversationOrchestrator, Arc<SandboxSession>, Arc<ScriptedLlmClient>) {
        let session = Arc::new(SandboxSession::demo("demo"));
        let (orch, llm) = orchestrator_over(session.clone(), session.model(), responses, Arc::new(confirmer));
        (orch, session, llm)
    }

    /// 等待确认期间用户取消了本轮
    struct CancelWhileAsking(CancellationToken);

    #[async_trait]
    impl Confirmer for CancelWhileAsking {
        async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationDecision {
            self.0.cancel();
            std::future::pending().await
        }
    }

    /// 第一次调用完成后触发取消
    struct CancelAfterFirstCall {
        inner: Arc<SandboxSession>,
        token: CancellationToken,
    }

    #[async_trait]
    impl SimulationSession for CancelAfterFirstCall {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn call(&self, action: &str, args: &Map<String, Value>) -> Result<SessionOutcome, SessionError> {
            let outcome = self.inner.call(action, args).await;
            self.token.cancel();
            outcome
        }

        async fn snapshot(&self) -> Result<ModelSnapshot, SessionError> {
            self.inner.snapshot().await
        }

        async fn open(&self, model_path: &str) -> Result<(), SessionError> {
            self.inner.open(model_path).await
        }
    }

    #[tokio::test]
    async fn test_conversational_turn_keeps_revision() {
        let (mut orch, session, _) = orchestrator(
            &[r#"{"reply": "Study 1 needs L.", "actions": []}"#],
            AutoConfirmer::deny_all(),
        );
        let reply = orch.submit_utterance("what does Study 1 need?").await;
        assert_eq!(reply, "Study 1 needs L.");
        assert_eq!(orch.revision(), 0);
        assert!(session.calls().is_empty());
        assert_eq!(orch.history().len(), 1);
        assert_eq!(orch.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_parse_failure_reprompts_once() {
        let (mut orch, _, llm) = orchestrator(
            &["{not json", r#"{"actions": [{"action": "build_mesh", "args": {}}]}"#],
            AutoConfirmer::deny_all(),
        );
        let report = orch.run_turn("mesh it", CancellationToken::new()).await;
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(orch.revision(), 1);
        let second = &llm.requests()[1];
        assert!(second.last().unwrap().content.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_llm_failure_yields_reply() {
        let (mut orch, _, llm) = orchestrator(&[], AutoConfirmer::deny_all());
        llm.push_error("connection reset");
        let report = orch.run_turn("hello", CancellationToken::new()).await;
        assert_eq!(report.outcome, TurnOutcome::Failed);
        assert!(report.reply.contains("connection reset"));
        assert_eq!(orch.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_before_proposal() {
        let (mut orch, session, _) = orchestrator(
            &[r#"{"actions": [{"action": "build_mesh"}]}"#],
            AutoConfirmer::deny_all(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let report = orch.run_turn("mesh", token).await;
        assert_eq!(report.outcome, TurnOutcome::Cancelled);
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_confirmation() {
        let session = Arc::new(SandboxSession::demo("demo"));
        let token = CancellationToken::new();
        let (mut orch, _) = orchestrator_over(
            session.clone(),
            session.model(),
            &[r#"{"actions": [{"action": "delete_feature", "args": {"feature": "blk1"}}]}"#],
            Arc::new(CancelWhileAsking(token.clone())),
        );
        let report = orch.run_turn("delete blk1", token).await;
        assert_eq!(report.outcome, TurnOutcome::Cancelled);
        assert!(report.results.is_empty());
        assert!(session.calls().is_empty());
        assert!(orch.snapshot().features.contains("blk1"));
        assert_eq!(orch.revision(), 0);
        assert_eq!(orch.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_during_execution_skips_remaining_actions() {
        let inner = Arc::new(SandboxSession::demo("demo"));
        let token = CancellationToken::new();
        let session = Arc::new(CancelAfterFirstCall {
            inner: inner.clone(),
            token: token.clone(),
        });
        let (mut orch, _) = orchestrator_over(
            session,
            inner.model(),
            &[r#"{"actions": [
                {"action": "set_parameter", "args": {"name": "L", "value": "10[mm]"}},
                {"action": "build_geometry"}
            ]}"#],
            Arc::new(AutoConfirmer::deny_all()),
        );
        let report = orch.run_turn("set L and rebuild", token).await;
        assert_eq!(report.outcome, TurnOutcome::Cancelled);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].is_success());
        assert_eq!(report.results[1].status, ActionStatus::Skipped);
        assert_eq!(report.revision, 1);
        assert_eq!(orch.snapshot().parameters.get("L").map(String::as_str), Some("10[mm]"));
        assert_eq!(inner.calls(), vec!["set_parameter"]);
        assert!(report.reply.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_refresh_context_reconciles_external_edit() {
        let (mut orch, session, _) = orchestrator(
            &[r#"{"actions": [{"action": "refresh_context"}]}"#],
            AutoConfirmer::deny_all(),
        );
        session.mutate_externally(|m| {
            m.parameters.insert("H".into(), "2[cm]".into());
        });
        let report = orch.run_turn("refresh", CancellationToken::new()).await;
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(orch.snapshot().parameters.get("H").map(String::as_str), Some("2[cm]"));
        assert_eq!(orch.revision(), 0);
        assert!(report.reply.contains("re-synchronised"));
    }

    #[tokio::test]
    async fn test_mutating_timeout_triggers_reconcile() {
        let (mut orch, session, _) = orchestrator(
            &[r#"{"actions": [{"action": "build_mesh"}, {"action": "save_model", "args": {"filename": "a.mph"}}]}"#],
            AutoConfirmer::deny_all(),
        );
        session.inject_failure("build_mesh", SessionError::Timeout("600s".into()));
        session.mutate_externally(|m| m.mesh_built = false);
        let report = orch.run_turn("mesh and save", CancellationToken::new()).await;
        assert_eq!(report.results[0].failure, Some(FailureClass::Drift));
        assert!(report.results[1].is_success());
        assert_eq!(report.outcome, TurnOutcome::Partial);
        assert!(!orch.snapshot().mesh_built);
        assert_eq!(orch.revision(), 1);
    }

    #[tokio::test]
    async fn test_resync_failure_is_drift_error() {
        let (mut orch, session, _) = orchestrator(&[], AutoConfirmer::deny_all());
        session.inject_failure(
            crate::session::sandbox::SNAPSHOT_CALL,
            SessionError::Rejected("bridge refused".into()),
        );
        let err = orch.resync().await.unwrap_err();
        assert!(matches!(err, AgentError::Drift(_)));
    }
}
