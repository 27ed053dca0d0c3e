//! 动作执行器
//!
//! 持有外部会话、串行锁与重试策略。execute 只接受 ValidatedAction，同一时刻最多一个调用在途；
//! 暂时性错误在执行器内部按指数退避重试，耗尽后才以 failed-execution 报告。
//! 每次执行输出一条结构化审计日志（JSON）。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::actions::{ActionKind, ActionResult, EffectClass, FailureClass, ValidatedAction};
use crate::core::AgentError;
use crate::session::{SessionError, SimulationSession};
use crate::snapshot::ModelSnapshot;

/// 暂时性错误的重试策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    /// 第 retry 次重试前的等待（从 1 开始）：base * 2^(retry-1)，不超过 max
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// 动作执行器
pub struct ActionExecutor {
    session: Arc<dyn SimulationSession>,
    gate: Mutex<()>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(session: Arc<dyn SimulationSession>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            session,
            gate: Mutex::new(()),
            policy,
            call_timeout,
        }
    }

    pub fn session_name(&self) -> &str {
        self.session.name()
    }

    /// 执行一个已校验的动作
    pub async fn execute(&self, action: ValidatedAction) -> ActionResult {
        let _gate = self.gate.lock().await;
        let request = action.request();
        let spec = action.spec();
        let effect = spec.effect;
        let start = Instant::now();

        let result = if spec.kind == ActionKind::RefreshContext {
            let (outcome, attempts) = self
                .with_retry(&request.action, effect, || self.session.snapshot())
                .await;
            match outcome {
                Ok(snapshot) => {
                    let mut r = ActionResult::succeeded(
                        request,
                        effect,
                        None,
                        None,
                        Some("Model context refreshed.".to_string()),
                        attempts,
                    );
                    r.observed = Some(snapshot);
                    r
                }
                Err(e) => failure(request, effect, e, attempts),
            }
        } else {
            let (outcome, attempts) = self
                .with_retry(&request.action, effect, || {
                    self.session.call(&request.action, &request.args)
                })
                .await;
            match outcome {
                Ok(outcome) => {
                    let delta = if effect.is_mutating() {
                        Some(
                            outcome
                                .delta
                                .unwrap_or_else(|| spec.kind.expected_delta(request)),
                        )
                    } else {
                        None
                    };
                    ActionResult::succeeded(request, effect, delta, outcome.value, outcome.message, attempts)
                }
                Err(e) => failure(request, effect, e, attempts),
            }
        };

        let audit = serde_json::json!({
            "event": "action_audit",
            "action": request.action,
            "effect": effect.to_string(),
            "outcome": result.status.as_str(),
            "attempts": result.attempts,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&Value::Object(request.args.clone())),
            "error": result.error,
        });
        tracing::info!(audit = %audit.to_string(), "action");
        result
    }

    /// 重新读取外部完整快照（/resync 与漂移自动校正）
    pub async fn read_snapshot(&self) -> Result<ModelSnapshot, SessionError> {
        let _gate = self.gate.lock().await;
        let (outcome, _) = self
            .with_retry("snapshot", EffectClass::Query, || self.session.snapshot())
            .await;
        outcome
    }

    /// 在会话中载入模型文件；重复载入同一文件无副作用，按查询重试
    pub async fn open_model(&self, model_path: &str) -> Result<(), SessionError> {
        let _gate = self.gate.lock().await;
        let (outcome, attempts) = self
            .with_retry("open", EffectClass::Query, || self.session.open(model_path))
            .await;
        match &outcome {
            Ok(()) => tracing::info!(session = %self.session.name(), model_path, "model opened"),
            Err(e) => tracing::warn!(session = %self.session.name(), model_path, attempts, "open failed: {}", e),
        }
        outcome
    }

    /// 带超时与指数退避的调用；返回结果与实际调用次数
    async fn with_retry<T, F, Fut>(
        &self,
        action: &str,
        effect: EffectClass,
        mut op: F,
    ) -> (Result<T, SessionError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match timeout(self.call_timeout, op()).await {
                Ok(Ok(value)) => return (Ok(value), attempts),
                Ok(Err(e)) => e,
                Err(_) => SessionError::Timeout(format!(
                    "no reply within {}s",
                    self.call_timeout.as_secs_f64()
                )),
            };
            // 修改类动作超时后结果未知，重试可能重复执行
            let retryable = err.is_transient()
                || (matches!(err, SessionError::Timeout(_)) && !effect.is_mutating());
            if !retryable || attempts > self.policy.max_retries {
                return (Err(err), attempts);
            }
            let delay = self.policy.delay(attempts);
            tracing::warn!(action, attempt = attempts, error = %err, delay_ms = delay.as_millis() as u64, "transient session error, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

/// 按错误种类与效果类别分类失败
pub fn classify(err: &SessionError, effect: EffectClass) -> FailureClass {
    match err {
        SessionError::StateMismatch(_) => FailureClass::Drift,
        SessionError::Timeout(_) if effect.is_mutating() => FailureClass::Drift,
        SessionError::Timeout(_) => FailureClass::Transient,
        e if e.is_transient() => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

fn failure(
    request: &crate::actions::ActionRequest,
    effect: EffectClass,
    err: SessionError,
    attempts: u32,
) -> ActionResult {
    let class = classify(&err, effect);
    let action = request.action.clone();
    let error = match class {
        FailureClass::Transient => AgentError::TransientExecution {
            action,
            attempts,
            source: err,
        },
        FailureClass::Permanent => AgentError::PermanentExecution { action, source: err },
        FailureClass::Drift => AgentError::Drift(format!("{action}: {err}")),
    };
    ActionResult::failed_execution(request, effect, error.to_string(), class, attempts)
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
