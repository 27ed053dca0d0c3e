//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COMSOL_AGENT__*` 覆盖（双下划线表示嵌套，如 `COMSOL_AGENT__SESSION__BACKEND=remote`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::actions::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub session: SessionSection,
    pub executor: ExecutorSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段：应用名、日志级别、历史轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 默认日志过滤指令，RUST_LOG 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 提供给协作方的历史轮数
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_app_name() -> String {
    "comsol-agent".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_history_turns() -> usize {
    20
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ scripted（离线）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// 会话后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Sandbox,
    Remote,
}

/// [session] 段：外部仿真会话
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub backend: SessionBackend,
    /// 远程桥接进程地址
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// 模型文件（COMSOL_MODEL 环境变量优先）
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// 单次调用上限；求解可能很慢
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            endpoint: default_endpoint(),
            model_path: default_model_path(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl SessionSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn resolved_model_path(&self) -> String {
        std::env::var("COMSOL_MODEL").unwrap_or_else(|_| self.model_path.clone())
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_model_path() -> String {
    "Demo_file.mph".to_string()
}

fn default_call_timeout_secs() -> u64 {
    600
}

/// [executor] 段：暂时性错误的重试
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl ExecutorSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8000
}

/// [orchestrator] 段：修订与重新提示上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 校验失败后请求协作方修订的次数
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    /// 输出无法解析时重新提示的次数
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            max_parse_retries: default_max_parse_retries(),
        }
    }
}

fn default_max_revisions() -> u32 {
    1
}

fn default_max_parse_retries() -> u32 {
    1
}

/// 从 config 目录加载配置，环境变量 COMSOL_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COMSOL_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COMSOL_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时回退默认配置（记录警告）
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_history_turns, 20);
        assert_eq!(cfg.session.backend, SessionBackend::Sandbox);
        assert_eq!(cfg.session.call_timeout_secs, 600);
        assert_eq!(cfg.executor.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.orchestrator.max_revisions, 1);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[session]\nbackend = \"remote\"\nendpoint = \"http://bridge:9000\"\n\n[executor]\nmax_retries = 5"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.session.backend, SessionBackend::Remote);
        assert_eq!(cfg.session.endpoint, "http://bridge:9000");
        assert_eq!(cfg.executor.max_retries, 5);
        // 未出现的键保持默认
        assert_eq!(cfg.executor.backoff_base_ms, 500);
        assert_eq!(cfg.app.max_history_turns, 20);
    }
}
