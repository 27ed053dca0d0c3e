//! 动作请求与结果
//!
//! ActionRequest 由语言理解协作方提出（一轮内有效，不持久化）；ActionResult 记录一次执行的结局。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::EffectClass;
use crate::snapshot::{ModelSnapshot, StateDelta};

/// 一次提出的动作：动作标识 + 绑定参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// 破坏性动作的用户确认标记；只能由编排器在用户确认后设置，协作方输出中的同名字段被忽略
    #[serde(default, skip_deserializing)]
    pub confirmed: bool,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            args,
            confirmed: false,
        }
    }

    /// 便于测试与脚本构造：args 传 json!({...})，非对象时视为空参数
    pub fn from_json(action: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(action, args)
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }

    /// 人类可读形式：set_parameter(name=L, value=10[mm])
    pub fn label(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect();
        format!("{}({})", self.action, args.join(", "))
    }
}

/// 执行结局
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    FailedValidation,
    FailedExecution,
    /// 因依赖的前序动作失败、用户拒绝确认或取消而未执行
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::FailedValidation => "failed-validation",
            ActionStatus::FailedExecution => "failed-execution",
            ActionStatus::Skipped => "skipped",
        }
    }
}

/// 执行失败的分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// 重试耗尽
    Transient,
    Permanent,
    /// 外部结果未知或与快照不一致，需要重新同步
    Drift,
}

/// 单个动作的执行结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub label: String,
    /// 动作涉及的研究（取自 study 参数）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study: Option<String>,
    pub effect: EffectClass,
    pub status: ActionStatus,
    /// 返回值（如评估得到的数值）
    pub value: Option<Value>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureClass>,
    /// 实际调用外部会话的次数（含重试）
    pub attempts: u32,
    pub delta: Option<StateDelta>,
    /// refresh_context 读到的外部完整快照
    #[serde(skip)]
    pub observed: Option<ModelSnapshot>,
    /// 产生该结果时的会话修订号（由编排器在 apply 后写入）
    pub revision: u64,
}

impl ActionResult {
    fn base(request: &ActionRequest, effect: EffectClass, status: ActionStatus) -> Self {
        Self {
            action: request.action.clone(),
            label: request.label(),
            study: request.str_arg("study").map(str::to_string),
            effect,
            status,
            value: None,
            message: None,
            error: None,
            failure: None,
            attempts: 0,
            delta: None,
            observed: None,
            revision: 0,
        }
    }

    pub fn succeeded(
        request: &ActionRequest,
        effect: EffectClass,
        delta: Option<StateDelta>,
        value: Option<Value>,
        message: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            delta,
            value,
            message,
            attempts,
            ..Self::base(request, effect, ActionStatus::Succeeded)
        }
    }

    pub fn failed_execution(
        request: &ActionRequest,
        effect: EffectClass,
        error: String,
        failure: FailureClass,
        attempts: u32,
    ) -> Self {
        Self {
            error: Some(error),
            failure: Some(failure),
            attempts,
            ..Self::base(request, effect, ActionStatus::FailedExecution)
        }
    }

    /// 校验失败（未调用外部会话）；effect 对失败结果无意义，记为 Query
    pub fn failed_validation(request: &ActionRequest, reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::base(request, EffectClass::Query, ActionStatus::FailedValidation)
        }
    }

    pub fn skipped(request: &ActionRequest, reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::base(request, EffectClass::Query, ActionStatus::Skipped)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}
