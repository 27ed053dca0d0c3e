//! COMSOL Agent - 自然语言驱动的仿真会话代理
//!
//! 模块划分：
//! - **actions**: 动作目录、参数校验、带重试的执行器
//! - **agent**: 组件工厂（LLM、会话后端、system prompt）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态投影、会话监管、构建器与运行时
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化离线）
//! - **memory**: 对话消息与轮次历史
//! - **session**: 外部仿真会话（内存沙箱 / 远程桥接）
//! - **snapshot**: 模型快照、增量与修订号
//! - **turn**: 提案、确认、一轮的状态机与回复组织

pub mod actions;
pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod session;
pub mod snapshot;
pub mod turn;
