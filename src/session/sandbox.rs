//! 内存沙箱会话
//!
//! 模拟一个带参数、几何特征、物理场与研究的模型，行为确定；支持按动作注入故障、
//! 以及在「代理之外」直接修改模型（用于复现漂移）。无 API Key / 无桥接进程时的默认后端。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::actions::catalog::physics_tag;
use crate::actions::ActionRequest;
use crate::session::{SessionError, SessionOutcome, SimulationSession};
use crate::snapshot::{parse_quantity, ModelSnapshot, StateDelta, StudyState, StudyStatus};

/// 故障注入时代表 snapshot() 调用的键
pub const SNAPSHOT_CALL: &str = "snapshot";
/// 故障注入时代表 open() 调用的键
pub const OPEN_CALL: &str = "open";

#[derive(Default)]
struct SandboxState {
    model: ModelSnapshot,
    failures: HashMap<String, VecDeque<SessionError>>,
    calls: Vec<String>,
    saved: Vec<String>,
    opened: Option<String>,
}

/// 内存模拟会话
pub struct SandboxSession {
    name: String,
    state: Mutex<SandboxState>,
}

impl SandboxSession {
    pub fn new(name: impl Into<String>, model: ModelSnapshot) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SandboxState {
                model,
                ..SandboxState::default()
            }),
        }
    }

    /// 演示模型：管道流动换热，Study 1 依赖尚未定义的参数 L
    pub fn demo(name: impl Into<String>) -> Self {
        let mut model = ModelSnapshot::default();
        model.parameters.insert("U_in".into(), "0.1[m/s]".into());
        model.parameters.insert("T_in".into(), "293.15[K]".into());
        model.parameters.insert("R".into(), "5[mm]".into());
        model.features.insert("blk1".into());
        model.features.insert("cyl1".into());
        model.physics.insert("spf".into());
        model.physics.insert("ht".into());
        model
            .studies
            .insert("Study 1".into(), StudyState::requiring(["L", "U_in"]));
        model
            .studies
            .insert("Study 2".into(), StudyState::requiring(["T_in"]));
        model.geometry_built = true;
        model.mesh_built = true;
        Self::new(name, model)
    }

    /// 为指定动作排队一个故障；每次调用消耗一个
    pub fn inject_failure(&self, action: &str, error: SessionError) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .entry(action.to_string())
                .or_default()
                .push_back(error);
        }
    }

    /// 在代理之外修改模型（模拟用户手动编辑、崩溃恢复等）
    pub fn mutate_externally(&self, edit: impl FnOnce(&mut ModelSnapshot)) {
        if let Ok(mut state) = self.state.lock() {
            edit(&mut state.model);
        }
    }

    /// 已收到的调用（动作标识，含失败的调用）
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn saved_files(&self) -> Vec<String> {
        self.state.lock().map(|s| s.saved.clone()).unwrap_or_default()
    }

    /// 最近一次 open() 载入的模型文件
    pub fn opened_model(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.opened.clone())
    }

    pub fn model(&self) -> ModelSnapshot {
        self.state.lock().map(|s| s.model.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SandboxState>, SessionError> {
        self.state
            .lock()
            .map_err(|_| SessionError::Protocol("sandbox state poisoned".to_string()))
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, SessionError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::Rejected(format!("missing argument `{name}`")))
}

/// 确定性的伪结果：参数名直接取其数值，其它表达式由字符计算得到
fn evaluate(model: &ModelSnapshot, expression: &str) -> f64 {
    if let Some((value, _)) = model
        .parameters
        .get(expression)
        .and_then(|v| parse_quantity(v))
    {
        return value;
    }
    let sum: u32 = expression.chars().map(|c| c as u32).sum();
    f64::from(sum % 997) / 10.0
}

fn perform(
    state: &mut SandboxState,
    action: &str,
    args: &Map<String, Value>,
) -> Result<SessionOutcome, SessionError> {
    let model = &state.model;
    let outcome = match action {
        "set_parameter" => {
            let name = str_arg(args, "name")?;
            let value = match args.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => return Err(SessionError::Rejected("missing argument `value`".into())),
            };
            let message = format!("Parameter '{name}' set to '{value}'.");
            SessionOutcome::with_delta(StateDelta::parameter(name, value)).message(message)
        }
        "build_geometry" => {
            if model.features.is_empty() {
                return Err(SessionError::Rejected("geometry sequence is empty".into()));
            }
            let delta = StateDelta {
                geometry_built: Some(true),
                mesh_built: Some(false),
                ..StateDelta::default()
            };
            SessionOutcome::with_delta(delta).message("Geometry built successfully.")
        }
        "build_mesh" => {
            if !model.geometry_built {
                return Err(SessionError::Rejected("geometry must be built before meshing".into()));
            }
            let delta = StateDelta {
                mesh_built: Some(true),
                ..StateDelta::default()
            };
            SessionOutcome::with_delta(delta).message("Mesh built successfully.")
        }
        "solve_study" => {
            let study = str_arg(args, "study")?;
            let missing = model
                .undefined_parameters(study)
                .ok_or_else(|| SessionError::Rejected(format!("no study named '{study}'")))?;
            if let Some(name) = missing.first() {
                return Err(SessionError::Rejected(format!("undefined parameter '{name}'")));
            }
            let mut delta = StateDelta::study(study, StudyStatus::Completed);
            delta.geometry_built = Some(true);
            delta.mesh_built = Some(true);
            SessionOutcome::with_delta(delta)
                .message(format!("Study '{study}' execution completed."))
        }
        "evaluate_expression" => {
            if !model.has_solution() {
                return Err(SessionError::Rejected(
                    "No solutions available to evaluate. Run a study first.".into(),
                ));
            }
            let expression = str_arg(args, "expression")?;
            let unit = args.get("unit").and_then(Value::as_str).unwrap_or("");
            let value = evaluate(model, expression);
            SessionOutcome {
                delta: None,
                value: Some(Value::from(value)),
                message: Some(format!("Result of '{expression}': {value} [{unit}]")),
            }
        }
        "save_model" => {
            let filename = str_arg(args, "filename")?.to_string();
            let message = format!("Model saved to '{filename}'.");
            state.saved.push(filename);
            SessionOutcome::default().message(message)
        }
        "add_physics" => {
            let request = ActionRequest::new(action, args.clone());
            let tag = physics_tag(&request);
            if model.physics.contains(&tag) {
                return Err(SessionError::Rejected(format!("duplicate tag '{tag}'")));
            }
            let mut delta = StateDelta::default();
            delta.added_physics.insert(tag.clone());
            SessionOutcome::with_delta(delta).message(format!("Physics '{tag}' added."))
        }
        "delete_feature" => {
            let feature = str_arg(args, "feature")?;
            if !model.features.contains(feature) {
                return Err(SessionError::StateMismatch(format!(
                    "feature '{feature}' not found"
                )));
            }
            let mut delta = StateDelta::default();
            delta.removed_features.insert(feature.to_string());
            SessionOutcome::with_delta(delta).message(format!("Feature '{feature}' deleted."))
        }
        "clear_solution" => {
            let study = str_arg(args, "study")?;
            if !model.studies.contains_key(study) {
                return Err(SessionError::Rejected(format!("no study named '{study}'")));
            }
            SessionOutcome::with_delta(StateDelta::study(study, StudyStatus::NotRun))
                .message(format!("Solution of '{study}' cleared."))
        }
        other => return Err(SessionError::Rejected(format!("unsupported action '{other}'"))),
    };
    if let Some(delta) = &outcome.delta {
        state.model.apply(delta);
    }
    Ok(outcome)
}

#[async_trait]
impl SimulationSession for SandboxSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        action: &str,
        args: &Map<String, Value>,
    ) -> Result<SessionOutcome, SessionError> {
        let mut state = self.lock()?;
        state.calls.push(action.to_string());
        if let Some(err) = state.failures.get_mut(action).and_then(VecDeque::pop_front) {
            tracing::debug!(action, error = %err, "sandbox injected failure");
            return Err(err);
        }
        perform(&mut state, action, args)
    }

    async fn snapshot(&self) -> Result<ModelSnapshot, SessionError> {
        let mut state = self.lock()?;
        if let Some(err) = state
            .failures
            .get_mut(SNAPSHOT_CALL)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(state.model.clone())
    }

    async fn open(&self, model_path: &str) -> Result<(), SessionError> {
        let mut state = self.lock()?;
        if let Some(err) = state.failures.get_mut(OPEN_CALL).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        tracing::debug!(model_path, "sandbox opened model");
        state.opened = Some(model_path.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_set_then_solve() {
        let s = SandboxSession::demo("demo");
        let err = s
            .call("solve_study", &args(json!({"study": "Study 1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(ref m) if m.contains("'L'")));

        let out = s
            .call("set_parameter", &args(json!({"name": "L", "value": "10[mm]"})))
            .await
            .unwrap();
        assert_eq!(out.message.as_deref(), Some("Parameter 'L' set to '10[mm]'."));
        // 参数变化使几何失效
        assert!(!s.model().geometry_built);

        s.call("solve_study", &args(json!({"study": "Study 1"})))
            .await
            .unwrap();
        assert_eq!(s.model().study_status("Study 1"), Some(StudyStatus::Completed));
        assert_eq!(s.calls(), vec!["solve_study", "set_parameter", "solve_study"]);
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let s = SandboxSession::demo("demo");
        s.inject_failure("build_mesh", SessionError::Busy("license".into()));
        assert!(s.call("build_mesh", &Map::new()).await.is_err());
        assert!(s.call("build_mesh", &Map::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_evaluate_is_deterministic() {
        let s = SandboxSession::demo("demo");
        s.mutate_externally(|m| {
            m.studies.get_mut("Study 2").unwrap().status = StudyStatus::Completed;
        });
        let a = s
            .call("evaluate_expression", &args(json!({"expression": "T", "unit": "K"})))
            .await
            .unwrap();
        let b = s
            .call("evaluate_expression", &args(json!({"expression": "T", "unit": "K"})))
            .await
            .unwrap();
        assert_eq!(a.value, b.value);
        let u = s
            .call("evaluate_expression", &args(json!({"expression": "U_in"})))
            .await
            .unwrap();
        assert_eq!(u.value, Some(json!(0.1)));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_external_edit() {
        let s = SandboxSession::demo("demo");
        s.mutate_externally(|m| {
            m.features.remove("cyl1");
        });
        let snap = s.snapshot().await.unwrap();
        assert!(!snap.features.contains("cyl1"));

        s.inject_failure(SNAPSHOT_CALL, SessionError::Unavailable("down".into()));
        assert!(s.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_feature_is_state_mismatch() {
        let s = SandboxSession::demo("demo");
        let err = s
            .call("delete_feature", &args(json!({"feature": "fil9"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StateMismatch(_)));
    }
}
