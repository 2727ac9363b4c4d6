//! ExecutionCoordinator：三种执行策略
//!
//! - delegated：单个分配，失败即阶段失败（已含 agent 级退避重试）
//! - sequential：严格按序，每步指令附上前一步输出；第 i 步失败则中止后续并返回部分结果
//! - parallel：每个分配一个任务，受 Semaphore 限制；失败互相隔离，结果按分配顺序收集
//!
//! 每次 agent 调用都会退避重试（agent_retry_limit），退避与调用都响应取消令牌。

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::{AgentExecutor, DeltaSink};
use crate::core::{AgentScheduler, ExecutorError, RecoveryAction, RecoveryEngine, SupervisorError};
use crate::pipeline::{
    AgentAssignment, AgentResult, EventSink, RefinementFeedback, RoutingDecision, Strategy,
    SupervisorEvent,
};

/// 顺序策略的续跑点：从 from_step 开始，之前的结果沿用 prior
#[derive(Debug, Clone)]
pub struct Resume {
    pub from_step: usize,
    pub prior: Vec<AgentResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure {
    pub error: SupervisorError,
    /// 顺序 / 委派策略中失败的步骤
    pub failed_step: Option<usize>,
}

/// 一次执行阶段的产出；失败时仍保留已得到的结果用于诊断
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub strategy: Strategy,
    pub results: Vec<AgentResult>,
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionReport {
    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// 阶段答案：委派取唯一输出，顺序取最后一个成功输出，并行按分配顺序拼接
    pub fn answer(&self) -> Option<String> {
        let ok: Vec<&AgentResult> = self.results.iter().filter(|r| r.success).collect();
        if ok.is_empty() {
            return None;
        }
        match self.strategy {
            Strategy::Delegated => ok.first().map(|r| r.output.clone()),
            Strategy::Sequential => ok.last().map(|r| r.output.clone()),
            Strategy::Parallel => Some(
                ok.iter()
                    .map(|r| format!("## {}\n{}", r.agent, r.output.trim()))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
        }
    }
}

/// 单个分配的执行者（含重试），可克隆进并行任务
#[derive(Clone)]
struct AgentRunner {
    executor: Arc<dyn AgentExecutor>,
    scheduler: AgentScheduler,
    recovery: RecoveryEngine,
    events: EventSink,
}

impl AgentRunner {
    fn finish(&self, result: AgentResult) -> AgentResult {
        self.events.emit(SupervisorEvent::AgentComplete {
            agent: result.agent.clone(),
            index: result.index,
            success: result.success,
            elapsed_ms: result.elapsed_ms,
            attempts: result.attempts,
        });
        result
    }

    async fn run(&self, a: AgentAssignment, cancel: CancellationToken) -> AgentResult {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let elapsed = || start.elapsed().as_millis() as u64;
            if cancel.is_cancelled() {
                return self.finish(AgentResult::failure(&a, "cancelled".into(), elapsed(), attempt));
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                p = self.scheduler.acquire() => p.ok(),
            };
            let Some(permit) = permit else {
                return self.finish(AgentResult::failure(&a, "cancelled".into(), elapsed(), attempt));
            };

            attempt += 1;
            self.events.emit(SupervisorEvent::AgentStart {
                agent: a.agent.clone(),
                index: a.index,
                attempt,
            });
            let call_start = Instant::now();
            let deltas = DeltaSink::new(self.events.clone(), a.agent.clone(), a.index);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                r = self.executor.run(&a, cancel.child_token(), deltas) => r,
            };
            drop(permit);

            let audit = serde_json::json!({
                "event": "agent_audit",
                "agent": a.agent,
                "index": a.index,
                "attempt": attempt,
                "ok": result.is_ok(),
                "duration_ms": call_start.elapsed().as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "agent");

            match result {
                Ok(output) => {
                    return self.finish(AgentResult::success(&a, output, elapsed(), attempt));
                }
                Err(e) => match self.recovery.on_agent_error(&e, attempt - 1) {
                    RecoveryAction::Retry { delay } => {
                        warn!(agent = %a.agent, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Agent call failed, retrying");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return self.finish(AgentResult::failure(&a, "cancelled".into(), elapsed(), attempt));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    _ => {
                        warn!(agent = %a.agent, attempts = attempt, error = %e, "Agent call failed");
                        return self.finish(AgentResult::failure(&a, e.to_string(), elapsed(), attempt));
                    }
                },
            }
        }
    }
}

pub struct ExecutionCoordinator {
    executor: Arc<dyn AgentExecutor>,
    scheduler: AgentScheduler,
    recovery: RecoveryEngine,
}

impl ExecutionCoordinator {
    pub fn new(executor: Arc<dyn AgentExecutor>, scheduler: AgentScheduler, recovery: RecoveryEngine) -> Self {
        Self {
            executor,
            scheduler,
            recovery,
        }
    }

    /// 由路由决策生成分配；精炼轮附带反馈
    pub fn build_assignments(
        decision: &RoutingDecision,
        feedback: Option<&RefinementFeedback>,
    ) -> Vec<AgentAssignment> {
        decision
            .agents
            .iter()
            .enumerate()
            .map(|(index, agent)| AgentAssignment {
                index,
                agent: agent.name.clone(),
                instruction: agent.instruction.clone(),
                tools: agent.tools.clone(),
                feedback: feedback.cloned(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        assignments: &[AgentAssignment],
        resume: Option<Resume>,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> ExecutionReport {
        let runner = AgentRunner {
            executor: self.executor.clone(),
            scheduler: self.scheduler.clone(),
            recovery: self.recovery.clone(),
            events: events.clone(),
        };
        info!(strategy = %decision.strategy, agents = assignments.len(), "Executing assignments");

        let mut report = if assignments.is_empty() {
            ExecutionReport {
                strategy: decision.strategy,
                results: vec![],
                failure: Some(ExecutionFailure {
                    error: SupervisorError::AgentExecutionFailed {
                        agent: "-".into(),
                        reason: "no assignments to execute".into(),
                    },
                    failed_step: None,
                }),
            }
        } else {
            match decision.strategy {
                Strategy::Delegated => Self::run_delegated(&runner, &assignments[0], cancel).await,
                Strategy::Sequential => Self::run_sequential(&runner, assignments, resume, cancel).await,
                Strategy::Parallel => Self::run_parallel(&runner, assignments, cancel).await,
            }
        };

        if cancel.is_cancelled() {
            report.failure = Some(ExecutionFailure {
                error: SupervisorError::Cancelled,
                failed_step: report.failure.as_ref().and_then(|f| f.failed_step),
            });
        }
        report
    }

    async fn run_delegated(
        runner: &AgentRunner,
        assignment: &AgentAssignment,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let result = runner.run(assignment.clone(), cancel.clone()).await;
        let failure = (!result.success).then(|| ExecutionFailure {
            error: SupervisorError::AgentExecutionFailed {
                agent: result.agent.clone(),
                reason: result.error.clone().unwrap_or_default(),
            },
            failed_step: Some(0),
        });
        ExecutionReport {
            strategy: Strategy::Delegated,
            results: vec![result],
            failure,
        }
    }

    async fn run_sequential(
        runner: &AgentRunner,
        assignments: &[AgentAssignment],
        resume: Option<Resume>,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let (start, mut results) = match resume {
            Some(r) => {
                let mut prior = r.prior;
                prior.truncate(r.from_step);
                (r.from_step, prior)
            }
            None => (0, Vec::new()),
        };
        let mut failure = None;

        for (step, assignment) in assignments.iter().enumerate().skip(start) {
            let mut a = assignment.clone();
            if let Some(prev) = results.iter().rev().find(|r| r.success) {
                a.instruction = format!(
                    "{}\n\nOutput from {}:\n{}",
                    a.instruction, prev.agent, prev.output
                );
            }
            let result = runner.run(a, cancel.clone()).await;
            let ok = result.success;
            let (agent, reason) = (result.agent.clone(), result.error.clone().unwrap_or_default());
            results.push(result);
            if !ok {
                failure = Some(ExecutionFailure {
                    error: SupervisorError::AgentExecutionFailed { agent, reason },
                    failed_step: Some(step),
                });
                break;
            }
        }

        ExecutionReport {
            strategy: Strategy::Sequential,
            results,
            failure,
        }
    }

    async fn run_parallel(
        runner: &AgentRunner,
        assignments: &[AgentAssignment],
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let mut slots: Vec<AgentResult> = assignments
            .iter()
            .map(|a| AgentResult::failure(a, "agent task aborted".into(), 0, 0))
            .collect();

        let mut set = JoinSet::new();
        for (pos, a) in assignments.iter().cloned().enumerate() {
            let runner = runner.clone();
            let token = cancel.clone();
            set.spawn(async move { (pos, runner.run(a, token).await) });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((pos, result)) => slots[pos] = result,
                Err(e) => warn!(error = %e, "Parallel agent task aborted"),
            }
        }

        let failure = slots.iter().all(|r| !r.success).then(|| ExecutionFailure {
            error: SupervisorError::AgentExecutionFailed {
                agent: slots
                    .iter()
                    .map(|r| r.agent.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                reason: format!("all {} parallel agents failed", slots.len()),
            },
            failed_step: None,
        });
        ExecutionReport {
            strategy: Strategy::Parallel,
            results: slots,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::MockAgentExecutor;
    use crate::core::RetryPolicy;
    use crate::pipeline::RoutedAgent;
    use std::time::Duration;

    fn decision(strategy: Strategy, names: &[&str]) -> RoutingDecision {
        RoutingDecision {
            agents: names
                .iter()
                .map(|n| RoutedAgent {
                    name: n.to_string(),
                    instruction: format!("{n} step"),
                    tools: vec![],
                    depends_on: vec![],
                })
                .collect(),
            strategy,
            rationale: String::new(),
        }
    }

    fn coordinator(exec: Arc<MockAgentExecutor>, parallel: usize, retries: u32) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            exec,
            AgentScheduler::new(parallel),
            RecoveryEngine::new(
                RetryPolicy {
                    limit: retries,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(4),
                },
                1,
            ),
        )
    }

    async fn run(
        c: &ExecutionCoordinator,
        d: &RoutingDecision,
        resume: Option<Resume>,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let assignments = ExecutionCoordinator::build_assignments(d, None);
        c.execute(d, &assignments, resume, cancel, &EventSink::disabled()).await
    }

    #[tokio::test]
    async fn test_delegated_retries_then_fails() {
        let exec = Arc::new(MockAgentExecutor::new().failing("Coder"));
        let c = coordinator(exec.clone(), 3, 2);
        let report = run(&c, &decision(Strategy::Delegated, &["Coder"]), None, &CancellationToken::new()).await;
        assert_eq!(exec.calls("Coder"), 3);
        assert_eq!(report.results[0].attempts, 3);
        let failure = report.failure.unwrap();
        assert_eq!(failure.failed_step, Some(0));
        assert!(matches!(failure.error, SupervisorError::AgentExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let exec = Arc::new(MockAgentExecutor::new().failing_first("Writer", 1).with_output("Writer", "done"));
        let c = coordinator(exec.clone(), 3, 2);
        let report = run(&c, &decision(Strategy::Delegated, &["Writer"]), None, &CancellationToken::new()).await;
        assert!(report.failure.is_none());
        assert_eq!(report.answer().as_deref(), Some("done"));
        assert_eq!(report.results[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_sequential_feeds_previous_output() {
        let exec = Arc::new(MockAgentExecutor::new().with_output("Researcher", "BTC is 65000"));
        let c = coordinator(exec.clone(), 3, 0);
        let report = run(&c, &decision(Strategy::Sequential, &["Researcher", "Analyst"]), None, &CancellationToken::new()).await;
        assert!(report.failure.is_none());
        let analyst = exec.instructions_for("Analyst");
        assert!(analyst[0].contains("Output from Researcher:\nBTC is 65000"));
        assert_eq!(report.answer().unwrap(), report.results[1].output);
    }

    #[tokio::test]
    async fn test_sequential_failure_stops_and_resumes() {
        let exec = Arc::new(MockAgentExecutor::new().failing_first("Analyst", 1));
        let c = coordinator(exec.clone(), 3, 0);
        let d = decision(Strategy::Sequential, &["Researcher", "Analyst", "Writer"]);
        let token = CancellationToken::new();
        let report = run(&c, &d, None, &token).await;
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failure.as_ref().unwrap().failed_step, Some(1));
        assert_eq!(exec.calls("Writer"), 0);

        let resume = Resume {
            from_step: 1,
            prior: report.results.clone(),
        };
        let report = run(&c, &d, Some(resume), &token).await;
        assert!(report.failure.is_none());
        assert_eq!(report.results.len(), 3);
        assert_eq!(exec.calls("Researcher"), 1);
    }

    #[tokio::test]
    async fn test_parallel_order_and_isolation() {
        let exec = Arc::new(
            MockAgentExecutor::new()
                .with_latency("Researcher", Duration::from_millis(40))
                .failing("Analyst")
                .with_latency("Writer", Duration::from_millis(5)),
        );
        let c = coordinator(exec.clone(), 3, 1);
        let report = run(&c, &decision(Strategy::Parallel, &["Researcher", "Analyst", "Writer"]), None, &CancellationToken::new()).await;
        let names: Vec<_> = report.results.iter().map(|r| r.agent.as_str()).collect();
        assert_eq!(names, vec!["Researcher", "Analyst", "Writer"]);
        assert_eq!(
            report.results.iter().map(|r| r.success).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert!(report.failure.is_none());
        let answer = report.answer().unwrap();
        assert!(answer.starts_with("## Researcher"));
        assert!(answer.contains("## Writer"));
        assert!(!answer.contains("## Analyst"));
    }

    #[tokio::test]
    async fn test_parallel_all_failed() {
        let exec = Arc::new(MockAgentExecutor::new().failing("Coder").failing("Writer"));
        let c = coordinator(exec, 2, 0);
        let report = run(&c, &decision(Strategy::Parallel, &["Coder", "Writer"]), None, &CancellationToken::new()).await;
        assert!(report.failure.is_some());
        assert!(report.answer().is_none());
    }

    #[tokio::test]
    async fn test_semaphore_bound() {
        let mut exec = MockAgentExecutor::new();
        let names = ["Researcher", "Analyst", "Coder", "Writer", "Generalist"];
        for n in names {
            exec = exec.with_latency(n, Duration::from_millis(20));
        }
        let exec = Arc::new(exec);
        let c = coordinator(exec.clone(), 2, 0);
        run(&c, &decision(Strategy::Parallel, &names), None, &CancellationToken::new()).await;
        assert!(exec.peak_in_flight() <= 2);
        assert_eq!(exec.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_results() {
        let exec = Arc::new(MockAgentExecutor::new().with_latency("Analyst", Duration::from_secs(30)));
        let c = coordinator(exec, 3, 0);
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            t.cancel();
        });
        let report = run(&c, &decision(Strategy::Sequential, &["Researcher", "Analyst"]), None, &token).await;
        assert_eq!(report.failure.unwrap().error, SupervisorError::Cancelled);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
    }
}
