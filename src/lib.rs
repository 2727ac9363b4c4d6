//! Hive - Rust 多智能体监督系统
//!
//! 模块划分：
//! - **agents**: 团队名单、工具目录、AgentExecutor 抽象（LLM / Mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、阶段状态机、运行上下文、会话监管、Supervisor 主控
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息
//! - **observability**: tracing 初始化
//! - **oracle**: 推理 oracle 抽象、启发式降级与 LLM 实现
//! - **pipeline**: intake、路由、执行策略、进度、质量与精炼

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod oracle;
pub mod pipeline;

pub use crate::core::{Supervisor, SupervisorBuilder, SupervisorError, SupervisorSettings};
pub use crate::pipeline::{RunOutcome, Task};
