//! Supervisor：顶层状态机
//!
//! INTAKE → FAST_PATH → RESPONSE_READY
//! INTAKE → ANALYSIS → ROUTING → EXECUTION → PROGRESS → QUALITY → (REFINEMENT → EXECUTION)* → COMPLETE
//!
//! 任一非终止阶段都可能进入 FAILED。SupervisorContext 只在本任务内修改，
//! 各组件通过返回值交回结果。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::AgentRoster;
use crate::core::{Phase, SessionSupervisor, SupervisorContext, SupervisorError, SupervisorSettings};
use crate::pipeline::{
    CacheStats, CaveatReason, Candidate, EventSink, ExecutionCoordinator, ExecutionReport,
    ProgressDecision, ProgressTracker, QualityCaveat, QualityCriteria, QualityGate,
    RefinementDecision, RefinementFeedback, RefinementLoop, Resume, Router, RunAnswer, RunEvent,
    RunFailure, RunOutcome, SupervisorEvent, Task, TaskIntake,
};

pub struct Supervisor {
    pub(crate) settings: SupervisorSettings,
    pub(crate) roster: Arc<AgentRoster>,
    pub(crate) session: SessionSupervisor,
    pub(crate) intake: TaskIntake,
    pub(crate) router: Router,
    pub(crate) coordinator: ExecutionCoordinator,
    pub(crate) tracker: ProgressTracker,
    pub(crate) gate: QualityGate,
    pub(crate) events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Supervisor {
    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn session(&self) -> &SessionSupervisor {
        &self.session
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.session.cache().stats()
    }

    pub fn has_judge(&self) -> bool {
        self.gate.has_judge()
    }

    /// 以会话子令牌运行一个任务
    pub async fn run(&self, task: Task) -> RunOutcome {
        let cancel = self.session.child_token();
        self.run_with_cancel(task, cancel).await
    }

    /// 以调用方提供的令牌运行；取消后以 Cancelled 失败并保留部分结果
    pub async fn run_with_cancel(&self, task: Task, cancel: CancellationToken) -> RunOutcome {
        let mut ctx = SupervisorContext::new(task);
        let events = EventSink::new(self.events.clone(), &ctx.run_id);
        info!(run_id = %ctx.run_id, task_id = %ctx.task.id, words = ctx.task.word_count(), "Run started");

        let outcome = match self.drive(&mut ctx, &cancel, &events).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(&mut ctx, e, &events),
        };
        let summary = outcome.summary();
        info!(
            run_id = %summary.run_id,
            phase = %outcome.phase(),
            refinement_rounds = summary.refinement_rounds,
            degraded = summary.degraded,
            "Run finished"
        );
        outcome
    }

    async fn drive(
        &self,
        ctx: &mut SupervisorContext,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<RunOutcome, SupervisorError> {
        self.intake_phase(ctx, events)?;
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }
        if self.intake.is_fast_path(&ctx.task) {
            return self.fast_path(ctx, cancel, events).await;
        }

        let task = ctx.task.clone();
        let budget = self.tracker.default_budget();

        ctx.transition(Phase::Analysis)?;
        let intake = &self.intake;
        let task_ref = &task;
        let analyzed = self
            .tracker
            .track(Phase::Analysis, budget, &mut ctx.phase_timings, cancel, events, |_, token| async move {
                intake.analyze(task_ref, &token).await
            })
            .await?;
        ctx.degraded |= analyzed.analysis.degraded;
        let analysis = analyzed.analysis;

        ctx.transition(Phase::Routing)?;
        let router = &self.router;
        let analysis_ref = &analysis;
        let routed = self
            .tracker
            .track(Phase::Routing, budget, &mut ctx.phase_timings, cancel, events, |_, token| async move {
                router.route(task_ref, analysis_ref, &token).await
            })
            .await?;
        ctx.degraded |= routed.degraded;
        ctx.warnings = routed.warnings;
        ctx.routing = Some(routed.decision);
        ctx.analysis = Some(analysis);

        self.refine_until_done(ctx, cancel, events).await
    }

    /// 校验设置与名单；任何越界值都在这里失败，不触发 oracle
    fn intake_phase(&self, ctx: &mut SupervisorContext, events: &EventSink) -> Result<(), SupervisorError> {
        events.emit(SupervisorEvent::PhaseStart {
            phase: Phase::Intake,
            attempt: 1,
        });
        let start = Instant::now();
        let validated = self.settings.validate(&self.roster);
        let elapsed = start.elapsed();
        ctx.phase_timings.record(Phase::Intake, elapsed);
        events.emit(SupervisorEvent::PhaseEnd {
            phase: Phase::Intake,
            elapsed_ms: elapsed.as_millis() as u64,
            ok: validated.is_ok(),
        });
        validated
    }

    /// 快速通道：启发式分析与路由，执行一次，不评估质量
    async fn fast_path(
        &self,
        ctx: &mut SupervisorContext,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<RunOutcome, SupervisorError> {
        ctx.fast_path = true;
        ctx.transition(Phase::FastPath)?;
        info!(run_id = %ctx.run_id, "Fast path");

        let analysis = self.intake.fast_analysis(&ctx.task);
        let routed = self.router.route_heuristic(&ctx.task, &analysis);
        let decision = routed.decision;
        ctx.warnings = routed.warnings;
        ctx.analysis = Some(analysis);
        ctx.routing = Some(decision.clone());

        let assignments = ExecutionCoordinator::build_assignments(&decision, None);
        let coordinator = &self.coordinator;
        let (decision_ref, assignments_ref) = (&decision, &assignments);
        let report = self
            .tracker
            .track(
                Phase::FastPath,
                self.tracker.default_budget(),
                &mut ctx.phase_timings,
                cancel,
                events,
                |_, token| async move {
                    Ok(coordinator
                        .execute(decision_ref, assignments_ref, None, &token, events)
                        .await)
                },
            )
            .await?;
        ctx.results = report.results.clone();

        if let Some(failure) = &report.failure {
            if failure.error == SupervisorError::Cancelled || report.successes() == 0 {
                return Err(failure.error.clone());
            }
            warn!(error = %failure.error, "Fast path finished with partial results");
        }
        let text = report.answer().ok_or_else(|| SupervisorError::AgentExecutionFailed {
            agent: decision.agent_names().join(", "),
            reason: "no agent produced output".into(),
        })?;

        ctx.transition(Phase::ResponseReady)?;
        Ok(RunOutcome::ResponseReady(RunAnswer {
            text,
            score: None,
            caveat: None,
            results: report.results,
            report: None,
            warnings: ctx.warnings.clone(),
            summary: ctx.summary(),
        }))
    }

    /// 执行一轮（含顺序策略的续跑），返回可评估的执行报告
    async fn execute_round(
        &self,
        ctx: &mut SupervisorContext,
        feedback: Option<&RefinementFeedback>,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<ExecutionReport, SupervisorError> {
        let decision = ctx
            .routing
            .clone()
            .ok_or_else(|| SupervisorError::Internal("execution without routing decision".into()))?;
        let assignments = ExecutionCoordinator::build_assignments(&decision, feedback);
        let budget = self.tracker.default_budget();
        let coordinator = &self.coordinator;
        let (decision_ref, assignments_ref) = (&decision, &assignments);
        let mut resume: Option<Resume> = None;

        loop {
            ctx.transition(Phase::Execution)?;
            let pending = &resume;
            let report = self
                .tracker
                .track(Phase::Execution, budget, &mut ctx.phase_timings, cancel, events, |_, token| {
                    let resume = pending.clone();
                    async move {
                        Ok(coordinator
                            .execute(decision_ref, assignments_ref, resume, &token, events)
                            .await)
                    }
                })
                .await?;
            ctx.results = report.results.clone();
            if matches!(&report.failure, Some(f) if f.error == SupervisorError::Cancelled) {
                return Err(SupervisorError::Cancelled);
            }

            ctx.transition(Phase::Progress)?;
            match self.tracker.resolve(&report, ctx.phase_retries) {
                ProgressDecision::Proceed => return Ok(report),
                ProgressDecision::ContinueWithPartial => {
                    warn!(
                        succeeded = report.successes(),
                        total = report.results.len(),
                        "Continuing with partial results"
                    );
                    return Ok(report);
                }
                ProgressDecision::RetryFromStep(step) => {
                    ctx.phase_retries += 1;
                    warn!(step, retry = ctx.phase_retries, "Resuming sequential execution from failed step");
                    resume = Some(Resume {
                        from_step: step,
                        prior: report.results,
                    });
                }
                ProgressDecision::Fail(e) => return Err(e),
            }
        }
    }

    /// 执行 → 评估 → 精炼，直到接受、停止或失败
    async fn refine_until_done(
        &self,
        ctx: &mut SupervisorContext,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<RunOutcome, SupervisorError> {
        let mut refinement = RefinementLoop::new(&self.settings);
        let mut feedback: Option<RefinementFeedback> = None;

        loop {
            let attempt = self.execute_and_assess(ctx, feedback.as_ref(), cancel, events).await;
            let candidate = match attempt {
                Ok(c) => c,
                Err(e) if e != SupervisorError::Cancelled && refinement.best().is_some() => {
                    warn!(error = %e, round = ctx.refinement_round(), "Refinement round failed, returning best result");
                    let caveat = QualityCaveat {
                        reason: CaveatReason::RefinementAborted,
                        best_score: refinement.best().map(Candidate::score).unwrap_or(0.0),
                        threshold: self.settings.quality_threshold,
                        rounds: ctx.refinement_round(),
                    };
                    if ctx.phase() == Phase::Execution {
                        ctx.transition(Phase::Progress)?;
                    }
                    return self.complete(ctx, &mut refinement, Some(caveat));
                }
                Err(e) => return Err(e),
            };

            let previous_score = candidate.score();
            match refinement.observe(candidate) {
                RefinementDecision::Accept => return self.complete(ctx, &mut refinement, None),
                RefinementDecision::AcceptWithCaveat(caveat) | RefinementDecision::Stop(caveat) => {
                    return self.complete(ctx, &mut refinement, Some(caveat))
                }
                RefinementDecision::Refine(next) => {
                    refinement.start_round()?;
                    let round = ctx.begin_refinement_round(self.settings.max_refinement_rounds)?;
                    ctx.transition(Phase::Refinement)?;
                    info!(round, previous_score, "Refinement round started");
                    events.emit(SupervisorEvent::RefinementRoundStarted { round, previous_score });
                    feedback = Some(next);
                }
            }
        }
    }

    async fn execute_and_assess(
        &self,
        ctx: &mut SupervisorContext,
        feedback: Option<&RefinementFeedback>,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<Candidate, SupervisorError> {
        let report = self.execute_round(ctx, feedback, cancel, events).await?;
        let output = report.answer().ok_or_else(|| SupervisorError::AgentExecutionFailed {
            agent: report
                .results
                .iter()
                .map(|r| r.agent.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            reason: "no agent produced output".into(),
        })?;

        ctx.transition(Phase::Quality)?;
        let criteria = QualityCriteria {
            threshold: self.settings.quality_threshold,
            required_capabilities: ctx
                .analysis
                .as_ref()
                .map(|a| a.capabilities.clone())
                .unwrap_or_default(),
            warnings: ctx.warnings.clone(),
            degraded_analysis: ctx.degraded,
        };
        let task = ctx.task.clone();
        let gate = &self.gate;
        let (task_ref, output_ref, criteria_ref) = (&task, &output, &criteria);
        let quality = self
            .tracker
            .track(
                Phase::Quality,
                self.tracker.default_budget(),
                &mut ctx.phase_timings,
                cancel,
                events,
                |_, token| async move { gate.assess(task_ref, output_ref, criteria_ref, &token).await },
            )
            .await?;
        ctx.degraded |= quality.degraded;
        ctx.last_report = Some(quality.clone());

        Ok(Candidate {
            output,
            results: report.results,
            report: quality,
            round: ctx.refinement_round(),
        })
    }

    fn complete(
        &self,
        ctx: &mut SupervisorContext,
        refinement: &mut RefinementLoop,
        caveat: Option<QualityCaveat>,
    ) -> Result<RunOutcome, SupervisorError> {
        let best = refinement
            .take_best()
            .ok_or_else(|| SupervisorError::Internal("no candidate to complete with".into()))?;
        ctx.transition(Phase::Complete)?;
        ctx.results = best.results.clone();
        ctx.last_report = Some(best.report.clone());
        if let Some(c) = &caveat {
            info!(reason = ?c.reason, best_score = c.best_score, rounds = c.rounds, "Completed with caveat");
        }
        Ok(RunOutcome::Complete(RunAnswer {
            text: best.output,
            score: Some(best.report.score),
            caveat,
            results: best.results,
            report: Some(best.report),
            warnings: ctx.warnings.clone(),
            summary: ctx.summary(),
        }))
    }

    fn fail(&self, ctx: &mut SupervisorContext, err: SupervisorError, events: &EventSink) -> RunOutcome {
        let phase = ctx.phase();
        if let Err(e) = ctx.transition(Phase::Failed) {
            warn!(error = %e, "Could not mark run as failed");
        }
        let kind = err.kind();
        events.emit(SupervisorEvent::Error {
            kind,
            phase,
            message: err.to_string(),
        });
        error!(run_id = %ctx.run_id, ?kind, %phase, error = %err, "Run failed");
        RunOutcome::Failed(RunFailure {
            kind,
            phase,
            message: err.to_string(),
            partial_results: ctx.results.clone(),
            summary: ctx.summary(),
        })
    }
}
