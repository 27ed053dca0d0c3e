//! 动作注册表
//!
//! 进程启动时一次性声明所有允许的动作（ActionSpec：参数 schema + 效果类别），之后只读。
//! 重复注册同一标识属于启动期配置错误，from_specs 直接返回 AgentError::Configuration。

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::catalog::{builtin_specs, ActionKind};
use crate::core::AgentError;

/// 动作的效果类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    /// 只读查询，不改变模型
    Query,
    Mutate,
    /// 代价高或不可逆，执行前必须获得用户确认
    Destructive,
}

impl EffectClass {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, EffectClass::Query)
    }
}

impl fmt::Display for EffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EffectClass::Query => "query",
            EffectClass::Mutate => "mutate",
            EffectClass::Destructive => "destructive",
        })
    }
}

/// 参数类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    /// 参数名等符号：字母或下划线开头
    Symbol,
    Number,
    /// 数值或表达式，如 10[mm]、2*L
    Quantity,
    Boolean,
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("symbol pattern is valid"))
}

impl ParamType {
    pub fn conforms(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Symbol => value.as_str().map(|s| symbol_re().is_match(s)).unwrap_or(false),
            ParamType::Number => value.is_number(),
            ParamType::Quantity => match value {
                Value::Number(_) => true,
                Value::String(s) => !s.trim().is_empty(),
                _ => false,
            },
            ParamType::Boolean => value.is_boolean(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Symbol => "a symbol name (letters, digits, underscore)",
            ParamType::Number => "a number",
            ParamType::Quantity => "a number or expression such as 10[mm]",
            ParamType::Boolean => "a boolean",
        }
    }

    fn json_type(&self) -> Value {
        match self {
            ParamType::String | ParamType::Symbol => Value::from("string"),
            ParamType::Number => Value::from("number"),
            ParamType::Quantity => serde_json::json!(["string", "number"]),
            ParamType::Boolean => Value::from("boolean"),
        }
    }
}

/// 参数上的附加约束
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamConstraint {
    NonEmpty,
    OneOf(Vec<String>),
    /// 文件名必须以该扩展名结尾（不区分大小写）
    FileExtension(String),
}

impl ParamConstraint {
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let text = value.as_str().map(str::trim);
        match self {
            ParamConstraint::NonEmpty => match text {
                Some(s) if s.is_empty() => Err("must not be empty".to_string()),
                _ => Ok(()),
            },
            ParamConstraint::OneOf(allowed) => match text {
                Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                _ => Err(format!("must be one of: {}", allowed.join(", "))),
            },
            ParamConstraint::FileExtension(ext) => match text {
                Some(s) if s.to_lowercase().ends_with(&ext.to_lowercase()) => Ok(()),
                _ => Err(format!("must be a file name ending in {ext}")),
            },
        }
    }
}

/// 单个参数声明
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub description: String,
    pub constraints: Vec<ParamConstraint>,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
            description: description.to_string(),
            constraints: Vec::new(),
        }
    }

    pub fn optional(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty, description)
        }
    }

    pub fn with(mut self, constraint: ParamConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// 动作声明：标识、语义种类、效果类别、有序参数表
#[derive(Clone, Debug)]
pub struct ActionSpec {
    pub id: String,
    pub kind: ActionKind,
    pub effect: EffectClass,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ActionSpec {
    pub fn new(kind: ActionKind, effect: EffectClass, description: &str) -> Self {
        Self {
            id: kind.as_str().to_string(),
            kind,
            effect,
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for p in &self.params {
            let mut prop = serde_json::json!({
                "type": p.ty.json_type(),
                "description": p.description,
            });
            for c in &p.constraints {
                if let ParamConstraint::OneOf(values) = c {
                    prop["enum"] = serde_json::json!(values);
                }
            }
            properties.insert(p.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// 动作注册表：按标识索引，保持声明顺序
#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    specs: Vec<ActionSpec>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    /// 从声明列表构建；出现重复标识即失败
    pub fn from_specs(specs: impl IntoIterator<Item = ActionSpec>) -> Result<Self, AgentError> {
        let mut registry = Self::default();
        for spec in specs {
            if registry.index.contains_key(&spec.id) {
                return Err(AgentError::Configuration(format!(
                    "duplicate action identifier `{}`",
                    spec.id
                )));
            }
            registry.index.insert(spec.id.clone(), registry.specs.len());
            registry.specs.push(spec);
        }
        Ok(registry)
    }

    /// 内置动作集
    pub fn builtin() -> Result<Self, AgentError> {
        Self::from_specs(builtin_specs())
    }

    pub fn lookup(&self, id: &str) -> Option<&ActionSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    pub fn specs(&self) -> &[ActionSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// 动态生成动作目录 JSON（名称、描述、效果类别、参数 schema），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let actions: Vec<Value> = self
            .specs
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "name": spec.id,
                    "description": spec.description,
                    "effect": spec.effect,
                    "parameters": spec.parameters_schema(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&actions).unwrap_or_else(|_| "[]".to_string())
    }
}
