//! 推理 oracle：抽象、启发式降级、LLM 实现与 Mock

pub mod heuristic;
pub mod llm_oracle;
pub mod mock;
pub mod schema;
pub mod traits;

pub use heuristic::HeuristicAnalyzer;
pub use llm_oracle::LlmOracle;
pub use mock::MockOracle;
pub use traits::ReasoningOracle;
