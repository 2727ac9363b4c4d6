//! 错误恢复引擎
//!
//! 根据错误类型与当前预算返回 RecoveryAction：agent 调用退避重试、oracle 失败降级、
//! 顺序策略部分失败时续跑 / 带部分结果继续 / 终止、阶段超时时重试或终止。

use std::time::Duration;

use crate::core::{ExecutorError, OracleError, RecoveryAction, SupervisorError};
use crate::pipeline::Strategy;

/// agent 调用的指数退避策略：base × 2^attempt，封顶 max_delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 首次失败后的额外尝试次数
    pub limit: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次（从 0 开始）失败后的等待时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 将错误映射为可执行动作
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
    phase_retry_budget: u32,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy, phase_retry_budget: u32) -> Self {
        Self {
            policy,
            phase_retry_budget,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn phase_retry_budget(&self) -> u32 {
        self.phase_retry_budget
    }

    /// 单次 agent 调用失败；attempt 为已失败的尝试序号（从 0 开始）
    ///
    /// 限流时服务端给出的等待时间优先于退避（取两者较大值）。
    pub fn on_agent_error(&self, err: &ExecutorError, attempt: u32) -> RecoveryAction {
        if !err.is_retryable() || attempt >= self.policy.limit {
            return RecoveryAction::Abort;
        }
        let backoff = self.policy.backoff(attempt);
        let delay = match err {
            ExecutorError::RateLimited { retry_after_ms } => {
                backoff.max(Duration::from_millis(*retry_after_ms))
            }
            _ => backoff,
        };
        RecoveryAction::Retry { delay }
    }

    /// oracle 不可达或超时：一律降级到启发式，从不致命
    pub fn on_oracle_error(&self, err: &OracleError) -> RecoveryAction {
        tracing::warn!(error = %err, "Reasoning oracle failed, degrading to heuristics");
        RecoveryAction::Degrade
    }

    /// 阶段超时；retries_used 为该阶段已消耗的重试次数，retry_budget 为该阶段的预算
    pub fn on_phase_timeout(&self, retries_used: u32, retry_budget: u32) -> RecoveryAction {
        if retries_used < retry_budget {
            RecoveryAction::Retry {
                delay: Duration::ZERO,
            }
        } else {
            RecoveryAction::Abort
        }
    }

    /// 执行阶段返回了失败：按策略决定续跑、带部分结果继续或终止
    pub fn on_partial_failure(
        &self,
        strategy: Strategy,
        error: &SupervisorError,
        failed_step: Option<usize>,
        surviving: usize,
        retries_used: u32,
    ) -> RecoveryAction {
        if matches!(error, SupervisorError::Cancelled) {
            return RecoveryAction::Abort;
        }
        match (strategy, failed_step) {
            (Strategy::Sequential, Some(step)) if retries_used < self.phase_retry_budget => {
                RecoveryAction::RetryFromStep(step)
            }
            _ if surviving > 0 => RecoveryAction::ContinueWithPartial,
            _ => RecoveryAction::Abort,
        }
    }
}
