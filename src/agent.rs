//! 组件工厂
//!
//! 根据配置与环境变量创建 LLM 客户端、外部会话后端，以及拼装 system prompt
//! （提示词模板 + 动作目录 + 提案格式 + 物理场名称）。

use std::sync::Arc;
use std::time::Duration;

use crate::actions::{physics, proposal_schema_json, ActionRegistry};
use crate::config::{AppConfig, SessionBackend};
use crate::core::AgentError;
use crate::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};
use crate::session::{RemoteSession, SandboxSession, SimulationSession};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert COMSOL Multiphysics assistant. \
You have control over the model through a fixed set of actions. \
When asked to change parameters, always offer to build geometry/mesh and solve/save as well.\n\n\
Current Model Context:\n{context}";

/// 根据配置与 OPENAI_API_KEY 选择 LLM 后端；无 Key 或 provider=scripted 时使用离线客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
    match api_key {
        Some(key) if provider != "scripted" => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                Duration::from_secs(cfg.llm.request_timeout_secs.max(1)),
            ))
        }
        _ => {
            tracing::warn!("No OPENAI_API_KEY set or provider is scripted, using offline scripted LLM");
            Arc::new(ScriptedLlmClient::new())
        }
    }
}

/// 根据 [session] 段创建外部会话
pub fn create_session_from_config(cfg: &AppConfig) -> Result<Arc<dyn SimulationSession>, AgentError> {
    let model = cfg.session.resolved_model_path();
    match cfg.session.backend {
        SessionBackend::Sandbox => {
            tracing::info!(model = %model, "Using in-memory sandbox session");
            Ok(Arc::new(SandboxSession::demo(format!("sandbox:{model}"))))
        }
        SessionBackend::Remote => {
            tracing::info!(endpoint = %cfg.session.endpoint, model = %model, "Using remote session bridge");
            let session = RemoteSession::new(
                format!("remote:{model}"),
                &cfg.session.endpoint,
                cfg.session.call_timeout(),
            )
            .map_err(|e| AgentError::Configuration(format!("remote session: {e}")))?;
            Ok(Arc::new(session))
        }
    }
}

/// 读取提示词模板：config/prompts/system.md，不存在则使用内置模板
pub fn load_prompt_template() -> String {
    [
        "config/prompts/system.md",
        "../config/prompts/system.md",
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 拼装完整 system prompt；模型概览占位符 {context} 留给每轮填充
pub fn build_system_prompt(template: &str, registry: &ActionRegistry) -> String {
    let mut prompt = template.trim_end().to_string();
    if !prompt.contains("{context}") {
        prompt.push_str("\n\nCurrent Model Context:\n{context}");
    }
    format!(
        "{prompt}\n\n## Available actions\n{}\n\n\
## Output format\n\
Reply with one JSON object matching this schema. List actions in the order they must run; \
use an empty list when no change to the model is needed. Destructive actions are confirmed \
with the user before they run.\n{}\n\n\
## Physics interface names\n{}",
        registry.to_schema_json(),
        proposal_schema_json(),
        physics::known_names().join(", "),
    )
}
