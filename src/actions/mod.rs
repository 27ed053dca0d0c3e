//! 动作层：注册表、内置动作目录、请求/结果、校验器与执行器

pub mod catalog;
pub mod executor;
pub mod physics;
pub mod registry;
pub mod request;
pub mod schema;
pub mod validator;

pub use catalog::ActionKind;
pub use executor::{ActionExecutor, RetryPolicy};
pub use registry::{ActionRegistry, ActionSpec, EffectClass, ParamConstraint, ParamSpec, ParamType};
pub use request::{ActionRequest, ActionResult, ActionStatus, FailureClass};
pub use schema::proposal_schema_json;
pub use validator::{ValidatedAction, ValidationError, Validator};
