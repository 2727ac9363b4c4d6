//! Agent 层：团队名单 / 工具目录、AgentExecutor 抽象及其 LLM 与 Mock 实现

pub mod executor;
pub mod llm_agent;
pub mod mock;
pub mod roster;

pub use executor::{AgentExecutor, DeltaSink};
pub use llm_agent::LlmAgentExecutor;
pub use mock::MockAgentExecutor;
pub use roster::{AgentProfile, AgentRoster, ToolCatalog, ToolSpec};
