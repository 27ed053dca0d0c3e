//! 动作校验器
//!
//! 按顺序检查：(a) 标识存在于注册表；(b) 必需参数已绑定且类型/约束符合；(c) 前置条件在快照上成立；
//! (d) 破坏性动作带有确认标记。只返回第一条违反项，不聚合多个错误。
//! 通过校验的请求被包装为 ValidatedAction，执行器只接受该类型。

use std::sync::Arc;

use thiserror::Error;

use crate::actions::{ActionRegistry, ActionRequest, ActionSpec, EffectClass};
use crate::snapshot::ModelSnapshot;

/// 校验失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("{action}: missing required argument `{param}`")]
    MissingArgument { action: String, param: String },

    #[error("{action}: unexpected argument `{param}`")]
    UnexpectedArgument { action: String, param: String },

    #[error("{action}: argument `{param}` must be {expected}")]
    InvalidArgument {
        action: String,
        param: String,
        expected: String,
    },

    #[error("{action}: argument `{param}` {reason}")]
    ConstraintViolated {
        action: String,
        param: String,
        reason: String,
    },

    #[error("{action}: precondition failed: {reason}")]
    PreconditionFailed { action: String, reason: String },

    #[error("{action}: destructive action requires explicit user confirmation")]
    ConfirmationRequired { action: String },
}

impl ValidationError {
    pub fn action(&self) -> &str {
        match self {
            ValidationError::UnknownAction(a) => a,
            ValidationError::MissingArgument { action, .. }
            | ValidationError::UnexpectedArgument { action, .. }
            | ValidationError::InvalidArgument { action, .. }
            | ValidationError::ConstraintViolated { action, .. }
            | ValidationError::PreconditionFailed { action, .. }
            | ValidationError::ConfirmationRequired { action } => action,
        }
    }
}

/// 已通过校验的动作；只能由 Validator 构造
#[derive(Clone, Debug)]
pub struct ValidatedAction {
    request: ActionRequest,
    spec: ActionSpec,
}

impl ValidatedAction {
    pub fn request(&self) -> &ActionRequest {
        &self.request
    }

    pub fn spec(&self) -> &ActionSpec {
        &self.spec
    }
}

/// 校验器：持有只读注册表
#[derive(Clone, Debug)]
pub struct Validator {
    registry: Arc<ActionRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    /// 检查请求，成功时返回对应的 ActionSpec
    pub fn check(
        &self,
        request: &ActionRequest,
        snapshot: &ModelSnapshot,
    ) -> Result<&ActionSpec, ValidationError> {
        // (a)
        let spec = self
            .registry
            .lookup(&request.action)
            .ok_or_else(|| ValidationError::UnknownAction(request.action.clone()))?;

        // (b)
        for name in request.args.keys() {
            if spec.param_spec(name).is_none() {
                return Err(ValidationError::UnexpectedArgument {
                    action: spec.id.clone(),
                    param: name.clone(),
                });
            }
        }
        for param in &spec.params {
            let value = request.args.get(&param.name).filter(|v| !v.is_null());
            let Some(value) = value else {
                if param.required {
                    return Err(ValidationError::MissingArgument {
                        action: spec.id.clone(),
                        param: param.name.clone(),
                    });
                }
                continue;
            };
            if !param.ty.conforms(value) {
                return Err(ValidationError::InvalidArgument {
                    action: spec.id.clone(),
                    param: param.name.clone(),
                    expected: param.ty.describe().to_string(),
                });
            }
            for constraint in &param.constraints {
                constraint
                    .check(value)
                    .map_err(|reason| ValidationError::ConstraintViolated {
                        action: spec.id.clone(),
                        param: param.name.clone(),
                        reason,
                    })?;
            }
        }

        // (c)
        spec.kind
            .check_preconditions(request, snapshot)
            .map_err(|reason| ValidationError::PreconditionFailed {
                action: spec.id.clone(),
                reason,
            })?;

        // (d)
        if spec.effect == EffectClass::Destructive && !request.confirmed {
            return Err(ValidationError::ConfirmationRequired {
                action: spec.id.clone(),
            });
        }

        Ok(spec)
    }

    /// 检查并包装为 ValidatedAction
    pub fn validate(
        &self,
        request: ActionRequest,
        snapshot: &ModelSnapshot,
    ) -> Result<ValidatedAction, ValidationError> {
        let spec = self.check(&request, snapshot)?.clone();
        Ok(ValidatedAction { request, spec })
    }
}
