//! 核心编排层：错误与恢复、阶段状态机、运行上下文、会话监管、agent 调度、Supervisor 主控

pub mod builder;
pub mod context;
pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod settings;
pub mod state;
pub mod supervisor;
pub mod task_scheduler;

pub use builder::{create_llm_from_config, SupervisorBuilder};
pub use context::SupervisorContext;
pub use error::{ErrorKind, ExecutorError, OracleError, RecoveryAction, SupervisorError};
pub use recovery::{RecoveryEngine, RetryPolicy};
pub use session_supervisor::SessionSupervisor;
pub use settings::SupervisorSettings;
pub use state::{Phase, PhaseTimings};
pub use supervisor::Supervisor;
pub use task_scheduler::AgentScheduler;
