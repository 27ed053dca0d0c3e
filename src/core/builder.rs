//! Agent 构建器：统一的初始化逻辑
//!
//! 终端与 Web 共用同一套动作注册表、会话后端和提示词；测试可替换 LLM、会话与确认方式。

use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::{ActionExecutor, ActionRegistry};
use crate::agent::{build_system_prompt, create_llm_from_config, create_session_from_config, load_prompt_template};
use crate::config::{load_config_or_default, AppConfig};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::session::SimulationSession;
use crate::snapshot::ModelSnapshot;
use crate::turn::{AutoConfirmer, Confirmer, ConversationOrchestrator, LlmProposer, OrchestratorSettings};

pub struct AgentBuilder {
    config: AppConfig,
    prompt_template: Option<String>,
    llm: Option<Arc<dyn LlmClient>>,
    session: Option<Arc<dyn SimulationSession>>,
    confirmer: Option<Arc<dyn Confirmer>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            prompt_template: None,
            llm: None,
            session: None,
            confirmer: None,
        }
    }

    /// 覆盖提示词模板（默认读取 config/prompts/system.md）
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SimulationSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// 未设置时破坏性动作一律拒绝
    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_revisions: self.config.orchestrator.max_revisions,
            max_parse_retries: self.config.orchestrator.max_parse_retries,
            max_history_turns: self.config.app.max_history_turns,
        }
    }

    /// 载入配置的模型文件并读取初始快照后构建编排器
    ///
    /// 载入失败只记录警告（桥接进程可能已打开了模型）；快照读取失败时从空快照开始。
    pub async fn connect(self) -> Result<ConversationOrchestrator, AgentError> {
        let model_path = self.config.session.resolved_model_path();
        let parts = self.assemble()?;
        if let Err(e) = parts.executor.open_model(&model_path).await {
            tracing::warn!(model_path = %model_path, "Could not open model ({}), continuing with the session as-is", e);
        }
        let initial = match parts.executor.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(session = %parts.executor.session_name(), "Initial snapshot failed ({}), starting empty; use /resync later", e);
                ModelSnapshot::default()
            }
        };
        Ok(parts.into_orchestrator(initial))
    }

    /// 以给定快照构建编排器（不访问会话）
    pub fn build(self, initial: ModelSnapshot) -> Result<ConversationOrchestrator, AgentError> {
        Ok(self.assemble()?.into_orchestrator(initial))
    }

    fn assemble(self) -> Result<Parts, AgentError> {
        let settings = self.settings();
        let registry = Arc::new(ActionRegistry::builtin()?);
        let session = match self.session {
            Some(session) => session,
            None => create_session_from_config(&self.config)?,
        };
        let llm = self
            .llm
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let template = self.prompt_template.unwrap_or_else(load_prompt_template);
        let system_prompt = build_system_prompt(&template, &registry);
        let executor = Arc::new(ActionExecutor::new(
            session,
            self.config.executor.retry_policy(),
            self.config.session.call_timeout(),
        ));
        let confirmer = self
            .confirmer
            .unwrap_or_else(|| Arc::new(AutoConfirmer::deny_all()));
        tracing::debug!(actions = registry.len(), "agent assembled");
        Ok(Parts {
            registry,
            proposer: Arc::new(LlmProposer::new(llm, system_prompt)),
            executor,
            confirmer,
            settings,
        })
    }
}

struct Parts {
    registry: Arc<ActionRegistry>,
    proposer: Arc<LlmProposer>,
    executor: Arc<ActionExecutor>,
    confirmer: Arc<dyn Confirmer>,
    settings: OrchestratorSettings,
}

impl Parts {
    fn into_orchestrator(self, initial: ModelSnapshot) -> ConversationOrchestrator {
        ConversationOrchestrator::new(
            self.registry,
            self.proposer,
            self.executor,
            self.confirmer,
            initial,
            self.settings,
        )
    }
}

/// 便捷函数：按默认查找顺序加载配置并创建构建器
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    AgentBuilder::new(load_config_or_default(config_path))
}
