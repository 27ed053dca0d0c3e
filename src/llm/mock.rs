//! Scripted LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预先排队的输出；队列为空时返回一个不含动作的对话式提案。
//! 记录每次收到的消息，便于测试检查反馈内容（如校验错误是否回传）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// 排队输出的脚本化客户端
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in responses {
            client.push(r);
        }
        client
    }

    /// 追加一条输出
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    /// 追加一次失败（模拟服务不可用）
    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(error.into()));
        }
    }

    /// 已收到的请求（每次调用的完整消息列表）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(response) => response,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(serde_json::json!({
                    "reply": format!("(offline) I received: {last_user}. No language service is configured, so no actions were proposed."),
                    "actions": [],
                })
                .to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_order_then_fallback() {
        let client = ScriptedLlmClient::with_responses(["first", "second"]);
        client.push_error("down");
        let msgs = [Message::user("hello")];
        assert_eq!(client.complete(&msgs).await.unwrap(), "first");
        assert_eq!(client.complete(&msgs).await.unwrap(), "second");
        assert_eq!(client.complete(&msgs).await.unwrap_err(), "down");
        let fallback = client.complete(&msgs).await.unwrap();
        assert!(fallback.contains("hello"));
        assert!(fallback.contains("\"actions\":[]"));
        assert_eq!(client.requests().len(), 4);
        assert_eq!(client.remaining(), 0);
    }
}
