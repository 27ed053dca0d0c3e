//! 提案 JSON Schema 生成（schemars）
//!
//! 将「合法提案」的 JSON 结构注入 system prompt，减少协作方输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 单个动作调用格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCallFormat {
    /// 动作标识，如 set_parameter、solve_study
    pub action: String,
    /// 动作参数，依动作不同而不同（name、value、study、expression ...）
    pub args: HashMap<String, serde_json::Value>,
}

/// 提案格式：给用户的简短回复 + 有序动作列表（可为空，表示只对话不改模型）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ProposalFormat {
    /// 给用户的简短说明
    pub reply: Option<String>,
    /// 按执行顺序排列的动作
    pub actions: Vec<ActionCallFormat>,
}

/// 返回提案的 JSON Schema 字符串，可拼入 system prompt
pub fn proposal_schema_json() -> String {
    let schema = schema_for!(ProposalFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_actions() {
        let schema = proposal_schema_json();
        assert!(schema.contains("\"actions\""));
        assert!(schema.contains("\"action\""));
    }
}
