//! 错误分类与恢复动作
//!
//! SupervisorError 是对调用方可见的错误分类；OracleError / ExecutorError 是两个外部协作方各自的错误，
//! 由 RecoveryEngine 决定是重试、降级、续跑还是终止。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::Phase;
use crate::llm::LlmError;

/// 错误种类（可序列化，出现在 RunFailure 与 error 事件里）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OracleUnavailable,
    AgentExecutionFailed,
    PhaseTimeout,
    RefinementExhausted,
    ConfigurationInvalid,
    Cancelled,
    Internal,
}

/// 一次运行中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupervisorError {
    #[error("Reasoning oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Agent '{agent}' failed: {reason}")]
    AgentExecutionFailed { agent: String, reason: String },

    #[error("Phase {phase} timed out after {elapsed_ms}ms")]
    PhaseTimeout { phase: Phase, elapsed_ms: u64 },

    /// 非致命：调用方拿到的是带 caveat 的历史最佳结果
    #[error("Refinement exhausted after {rounds} rounds (best score {best_score:.2})")]
    RefinementExhausted { rounds: usize, best_score: f64 },

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Run cancelled")]
    Cancelled,

    /// 非法状态迁移等编程错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            SupervisorError::AgentExecutionFailed { .. } => ErrorKind::AgentExecutionFailed,
            SupervisorError::PhaseTimeout { .. } => ErrorKind::PhaseTimeout,
            SupervisorError::RefinementExhausted { .. } => ErrorKind::RefinementExhausted,
            SupervisorError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            SupervisorError::Cancelled => ErrorKind::Cancelled,
            SupervisorError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// ReasoningOracle 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle timed out")]
    Timeout,

    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for OracleError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => OracleError::Timeout,
            LlmError::InvalidResponse(msg) => OracleError::InvalidResponse(msg),
            other => OracleError::Unavailable(other.to_string()),
        }
    }
}

impl From<OracleError> for SupervisorError {
    fn from(e: OracleError) -> Self {
        SupervisorError::OracleUnavailable(e.to_string())
    }
}

/// AgentExecutor 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Agent failed: {0}")]
    Failed(String),

    #[error("Agent timed out")]
    Timeout,

    #[error("Agent rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Agent cancelled")]
    Cancelled,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

impl ExecutorError {
    /// 瞬时错误才值得退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Failed(_) | ExecutorError::Timeout | ExecutorError::RateLimited { .. }
        )
    }
}

impl From<LlmError> for ExecutorError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => ExecutorError::Timeout,
            LlmError::RateLimited { retry_after_ms } => ExecutorError::RateLimited { retry_after_ms },
            other => ExecutorError::Failed(other.to_string()),
        }
    }
}

/// 恢复引擎给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待 delay 后重试同一调用
    Retry { delay: Duration },
    /// 从顺序策略的第 n 步续跑（保留之前的结果）
    RetryFromStep(usize),
    /// 改用启发式结果并标记 degraded
    Degrade,
    /// 带着已有的部分结果继续
    ContinueWithPartial,
    Abort,
}
