//! TaskIntake：快速通道判定 + 会话级分析缓存，包装 oracle.analyze
//!
//! 短任务或 light 档位直接走启发式（从不等待 oracle）；否则查缓存，未命中才调用 oracle。
//! oracle 出错或超时降级为启发式结果并标记 degraded，不写入缓存。唯一对外暴露的错误是 Cancelled。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PipelineProfile;
use crate::core::{OracleError, RecoveryEngine, SupervisorError, SupervisorSettings};
use crate::oracle::{HeuristicAnalyzer, ReasoningOracle};
use crate::pipeline::{AnalysisCache, AnalysisResult, Complexity, Task};

/// analyze 的结果
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub analysis: AnalysisResult,
    pub fast_path: bool,
    pub cache_hit: bool,
}

pub struct TaskIntake {
    oracle: Arc<dyn ReasoningOracle>,
    cache: Arc<AnalysisCache>,
    recovery: RecoveryEngine,
    profile: PipelineProfile,
    simple_task_max_words: usize,
    oracle_timeout: Duration,
}

impl TaskIntake {
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        cache: Arc<AnalysisCache>,
        recovery: RecoveryEngine,
        settings: &SupervisorSettings,
    ) -> Self {
        Self {
            oracle,
            cache,
            recovery,
            profile: settings.profile,
            simple_task_max_words: settings.simple_task_max_words,
            oracle_timeout: settings.oracle_timeout,
        }
    }

    pub fn is_fast_path(&self, task: &Task) -> bool {
        self.profile == PipelineProfile::Light || task.word_count() <= self.simple_task_max_words
    }

    /// 启发式快速分析（complexity 固定为 low）
    pub fn fast_analysis(&self, task: &Task) -> AnalysisResult {
        let mut analysis = HeuristicAnalyzer::analyze(task, false);
        analysis.complexity = Complexity::Low;
        analysis
    }

    pub async fn analyze(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<IntakeOutcome, SupervisorError> {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }
        if self.is_fast_path(task) {
            debug!(words = task.word_count(), "Fast path, skipping oracle analysis");
            return Ok(IntakeOutcome {
                analysis: self.fast_analysis(task),
                fast_path: true,
                cache_hit: false,
            });
        }

        let key = task.normalized_key();
        let lookup = self.cache.get_or_try_init(&key, || async {
            match tokio::time::timeout(self.oracle_timeout, self.oracle.analyze(task)).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout),
            }
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
            r = lookup => r,
        };

        match result {
            Ok((analysis, cache_hit)) => {
                if cache_hit {
                    debug!(key = %key, "Analysis cache hit");
                } else {
                    info!(complexity = ?analysis.complexity, capabilities = ?analysis.capabilities, "Task analyzed");
                }
                Ok(IntakeOutcome {
                    analysis,
                    fast_path: false,
                    cache_hit,
                })
            }
            Err(e) => {
                self.recovery.on_oracle_error(&e);
                Ok(IntakeOutcome {
                    analysis: HeuristicAnalyzer::analyze(task, true),
                    fast_path: false,
                    cache_hit: false,
                })
            }
        }
    }
}
