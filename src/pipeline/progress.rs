//! ProgressTracker：阶段超时 / 重试预算 / 耗时记录
//!
//! track 为每次尝试派生子取消令牌；超时后取消子令牌（在途 agent 调用随之中止），
//! 预算内重试，否则返回 PhaseTimeout。每次尝试的耗时累加进 PhaseTimings，超过慢阶段阈值时发出告警事件。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Phase, PhaseTimings, RecoveryAction, RecoveryEngine, SupervisorError, SupervisorSettings};
use crate::pipeline::{EventSink, ExecutionReport, SupervisorEvent};

/// 单个阶段的时间预算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseBudget {
    pub timeout: Duration,
    pub retry_budget: u32,
}

/// 执行阶段结束后的处置
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressDecision {
    /// 全部成功，或并行策略部分成功
    Proceed,
    RetryFromStep(usize),
    /// 带部分结果继续
    ContinueWithPartial,
    Fail(SupervisorError),
}

pub struct ProgressTracker {
    budget: PhaseBudget,
    slow_threshold: Duration,
    recovery: RecoveryEngine,
}

impl ProgressTracker {
    pub fn new(recovery: RecoveryEngine, settings: &SupervisorSettings) -> Self {
        Self {
            budget: PhaseBudget {
                timeout: settings.phase_timeout,
                retry_budget: settings.phase_retry_budget,
            },
            slow_threshold: settings.slow_execution_threshold,
            recovery,
        }
    }

    pub fn default_budget(&self) -> PhaseBudget {
        self.budget
    }

    /// 在超时与重试预算内运行一个阶段；op 接收 (尝试序号, 子取消令牌)
    pub async fn track<T, F, Fut>(
        &self,
        phase: Phase,
        budget: PhaseBudget,
        timings: &mut PhaseTimings,
        cancel: &CancellationToken,
        events: &EventSink,
        mut op: F,
    ) -> Result<T, SupervisorError>
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, SupervisorError>>,
    {
        let mut retries_used: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SupervisorError::Cancelled);
            }
            let attempt = retries_used + 1;
            events.emit(SupervisorEvent::PhaseStart { phase, attempt });
            debug!(%phase, attempt, "Phase started");

            let child = cancel.child_token();
            let start = Instant::now();
            let outcome = tokio::time::timeout(budget.timeout, op(retries_used, child.clone())).await;
            let elapsed = start.elapsed();
            timings.record(phase, elapsed);
            self.check_slow(phase, elapsed, events);

            let elapsed_ms = elapsed.as_millis() as u64;
            match outcome {
                Ok(result) => {
                    events.emit(SupervisorEvent::PhaseEnd {
                        phase,
                        elapsed_ms,
                        ok: result.is_ok(),
                    });
                    return result;
                }
                Err(_) => {
                    child.cancel();
                    events.emit(SupervisorEvent::PhaseEnd {
                        phase,
                        elapsed_ms,
                        ok: false,
                    });
                    match self.recovery.on_phase_timeout(retries_used, budget.retry_budget) {
                        RecoveryAction::Retry { .. } => {
                            warn!(%phase, attempt, elapsed_ms, "Phase timed out, retrying");
                            retries_used += 1;
                        }
                        _ => {
                            warn!(%phase, attempt, elapsed_ms, "Phase timed out, retry budget exhausted");
                            return Err(SupervisorError::PhaseTimeout { phase, elapsed_ms });
                        }
                    }
                }
            }
        }
    }

    fn check_slow(&self, phase: Phase, elapsed: Duration, events: &EventSink) {
        if elapsed > self.slow_threshold {
            let elapsed_ms = elapsed.as_millis() as u64;
            let threshold_ms = self.slow_threshold.as_millis() as u64;
            warn!(%phase, elapsed_ms, threshold_ms, "Slow phase");
            events.emit(SupervisorEvent::SlowPhaseWarning {
                phase,
                elapsed_ms,
                threshold_ms,
            });
        }
    }

    /// 执行阶段返回后决定：继续、从失败步骤续跑、带部分结果继续或失败
    pub fn resolve(&self, report: &ExecutionReport, retries_used: u32) -> ProgressDecision {
        let Some(failure) = &report.failure else {
            return ProgressDecision::Proceed;
        };
        let surviving = report.successes();
        match self.recovery.on_partial_failure(
            report.strategy,
            &failure.error,
            failure.failed_step,
            surviving,
            retries_used,
        ) {
            RecoveryAction::RetryFromStep(step) => ProgressDecision::RetryFromStep(step),
            RecoveryAction::ContinueWithPartial => ProgressDecision::ContinueWithPartial,
            _ => ProgressDecision::Fail(failure.error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::pipeline::{AgentResult, ExecutionFailure, Strategy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn tracker(timeout: Duration, retries: u32, slow: Duration) -> ProgressTracker {
        let settings = SupervisorSettings {
            phase_timeout: timeout,
            phase_retry_budget: retries,
            slow_execution_threshold: slow,
            ..Default::default()
        };
        ProgressTracker::new(RecoveryEngine::new(RetryPolicy::default(), retries), &settings)
    }

    #[tokio::test]
    async fn test_timeout_retries_then_fails() {
        let t = tracker(Duration::from_millis(20), 1, Duration::from_secs(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let mut timings = PhaseTimings::new();
        let a = attempts.clone();
        let err = t
            .track(
                Phase::Execution,
                t.default_budget(),
                &mut timings,
                &CancellationToken::new(),
                &EventSink::disabled(),
                move |_, _token| {
                    let a = a.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, SupervisorError>(())
                    }
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::PhaseTimeout { phase: Phase::Execution, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(timings.get(Phase::Execution).unwrap() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_timeout_cancels_child_token() {
        let t = tracker(Duration::from_millis(20), 0, Duration::from_secs(10));
        let seen = Arc::new(std::sync::Mutex::new(None::<CancellationToken>));
        let s = seen.clone();
        let mut timings = PhaseTimings::new();
        let _ = t
            .track(
                Phase::Execution,
                t.default_budget(),
                &mut timings,
                &CancellationToken::new(),
                &EventSink::disabled(),
                move |_, token| {
                    *s.lock().unwrap() = Some(token);
                    async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, SupervisorError>(())
                    }
                },
            )
            .await;
        assert!(seen.lock().unwrap().as_ref().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_slow_phase_warning_emitted() {
        let t = tracker(Duration::from_secs(5), 0, Duration::from_millis(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSink::new(Some(tx), "run_slow");
        let mut timings = PhaseTimings::new();
        let v = t
            .track(
                Phase::Quality,
                t.default_budget(),
                &mut timings,
                &CancellationToken::new(),
                &events,
                |_, _| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, SupervisorError>(7)
                },
            )
            .await
            .unwrap();
        assert_eq!(v, 7);
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["phase_start", "slow_phase_warning", "phase_end"]);
    }

    #[tokio::test]
    async fn test_refuses_when_cancelled() {
        let t = tracker(Duration::from_secs(1), 0, Duration::from_secs(1));
        let token = CancellationToken::new();
        token.cancel();
        let mut timings = PhaseTimings::new();
        let err = t
            .track(Phase::Analysis, t.default_budget(), &mut timings, &token, &EventSink::disabled(), |_, _| async {
                Ok::<_, SupervisorError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::Cancelled);
        assert!(timings.get(Phase::Analysis).is_none());
    }

    fn failed(agent: &str, index: usize) -> AgentResult {
        AgentResult {
            agent: agent.into(),
            index,
            output: String::new(),
            success: false,
            error: Some("boom".into()),
            elapsed_ms: 1,
            attempts: 1,
        }
    }

    #[test]
    fn test_resolve_decisions() {
        let t = tracker(Duration::from_secs(1), 1, Duration::from_secs(1));
        let ok = AgentResult {
            success: true,
            output: "x".into(),
            error: None,
            ..failed("Researcher", 0)
        };
        let err = SupervisorError::AgentExecutionFailed {
            agent: "Analyst".into(),
            reason: "boom".into(),
        };
        let report = ExecutionReport {
            strategy: Strategy::Sequential,
            results: vec![ok.clone(), failed("Analyst", 1)],
            failure: Some(ExecutionFailure {
                error: err.clone(),
                failed_step: Some(1),
            }),
        };
        assert_eq!(t.resolve(&report, 0), ProgressDecision::RetryFromStep(1));
        assert_eq!(t.resolve(&report, 1), ProgressDecision::ContinueWithPartial);

        let nothing = ExecutionReport {
            strategy: Strategy::Sequential,
            results: vec![failed("Researcher", 0)],
            failure: Some(ExecutionFailure {
                error: err.clone(),
                failed_step: Some(0),
            }),
        };
        assert_eq!(t.resolve(&nothing, 1), ProgressDecision::Fail(err));

        let parallel_partial = ExecutionReport {
            strategy: Strategy::Parallel,
            results: vec![ok, failed("Analyst", 1)],
            failure: None,
        };
        assert_eq!(t.resolve(&parallel_partial, 0), ProgressDecision::Proceed);
    }
}
