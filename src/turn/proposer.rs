//! 提案者：语言理解协作方的适配层
//!
//! 给协作方的上下文 = system prompt（动作目录 + 提案格式）+ 当前模型概览 + 历史轮次 + 本轮输入，
//! 以及（修订时）上一次提案被拒绝的原因。parse_proposal 从输出中提取 JSON 并解析为有序动作列表；
//! 没有 JSON 时整段输出视为纯对话回复。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::actions::ActionRequest;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// 一次提案请求
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub history: Vec<Message>,
    pub snapshot_summary: String,
    pub utterance: String,
    /// 修订或重新提示时附带的反馈（如校验错误）
    pub feedback: Vec<String>,
}

/// 协作方给出的提案：可选回复 + 有序动作（为空表示只对话）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proposal {
    pub reply: Option<String>,
    pub actions: Vec<ActionRequest>,
}

impl Proposal {
    pub fn is_conversational(&self) -> bool {
        self.actions.is_empty()
    }
}

#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&self, request: &ProposalRequest) -> Result<Proposal, AgentError>;

    /// 累计 token 用量 (prompt, completion, total)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(alias = "tool", alias = "name")]
    action: String,
    #[serde(default, alias = "arguments")]
    args: Value,
}

#[derive(Deserialize)]
struct RawProposal {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    actions: Vec<RawCall>,
}

fn into_request(call: RawCall) -> ActionRequest {
    let args = match call.args {
        Value::Object(map) => map,
        // 部分模型把参数写成 JSON 字符串
        Value::String(s) => serde_json::from_str::<Map<String, Value>>(&s).unwrap_or_default(),
        _ => Map::new(),
    };
    ActionRequest::new(call.action, args)
}

/// 解析协作方输出：```json 块或首尾花括号之间的 JSON；无 JSON 则为纯对话
pub fn parse_proposal(output: &str) -> Result<Proposal, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    } else if let Some(start) = trimmed.find('[') {
        // 只给出动作数组
        match trimmed.rfind(']') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    } else {
        return Ok(Proposal {
            reply: Some(trimmed.to_string()).filter(|s| !s.is_empty()),
            actions: Vec::new(),
        });
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParse(format!("{}: {}", e, json_str)))?;

    let raw = match value {
        Value::Array(_) => RawProposal {
            reply: None,
            actions: serde_json::from_value(value)
                .map_err(|e| AgentError::JsonParse(e.to_string()))?,
        },
        // 单个调用 {"action": ..., "args": ...}
        Value::Object(ref map)
            if (map.contains_key("action") || map.contains_key("tool")) && !map.contains_key("actions") =>
        {
            RawProposal {
                reply: None,
                actions: vec![serde_json::from_value(value)
                    .map_err(|e| AgentError::JsonParse(e.to_string()))?],
            }
        }
        other => serde_json::from_value(other).map_err(|e| AgentError::JsonParse(e.to_string()))?,
    };

    Ok(Proposal {
        reply: raw.reply.filter(|s| !s.trim().is_empty()),
        actions: raw.actions.into_iter().map(into_request).collect(),
    })
}

/// 基于 LLM 的提案者
pub struct LlmProposer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmProposer {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 拼装消息：system（含模型概览）+ 历史 + 本轮输入 + 反馈
    pub fn build_messages(&self, request: &ProposalRequest) -> Vec<Message> {
        let system = if self.system_prompt.contains("{context}") {
            self.system_prompt.replace("{context}", &request.snapshot_summary)
        } else {
            format!(
                "{}\n\nCurrent Model Context:\n{}",
                self.system_prompt, request.snapshot_summary
            )
        };
        let mut messages = Vec::with_capacity(request.history.len() + 3);
        messages.push(Message::system(system));
        messages.extend(request.history.iter().cloned());
        messages.push(Message::user(request.utterance.clone()));
        for fb in &request.feedback {
            messages.push(Message::user(fb.clone()));
        }
        messages
    }
}

#[async_trait]
impl Proposer for LlmProposer {
    async fn propose(&self, request: &ProposalRequest) -> Result<Proposal, AgentError> {
        let messages = self.build_messages(request);
        let output = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        tracing::debug!(output = %output, "collaborator output");
        parse_proposal(&output)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}
