//! SupervisorContext：单次运行的全部可变状态
//!
//! 只由 Supervisor 所在任务持有并修改；并行 agent 任务通过返回值交回结果。

use crate::core::{Phase, PhaseTimings, SupervisorError};
use crate::pipeline::{
    AgentResult, AnalysisResult, EdgeCaseWarning, QualityReport, RoutingDecision, RunSummary, Task,
};

#[derive(Debug)]
pub struct SupervisorContext {
    pub run_id: String,
    pub task: Task,
    phase: Phase,
    pub phase_timings: PhaseTimings,
    pub analysis: Option<AnalysisResult>,
    pub fast_path: bool,
    pub routing: Option<RoutingDecision>,
    pub warnings: Vec<EdgeCaseWarning>,
    /// 任一阶段走了启发式降级
    pub degraded: bool,
    refinement_round: usize,
    /// 最近一次执行阶段的结果（失败时用于诊断）
    pub results: Vec<AgentResult>,
    pub last_report: Option<QualityReport>,
    /// 执行阶段已消耗的续跑次数
    pub phase_retries: u32,
}

impl SupervisorContext {
    pub fn new(task: Task) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            task,
            phase: Phase::Intake,
            phase_timings: PhaseTimings::new(),
            analysis: None,
            fast_path: false,
            routing: None,
            warnings: Vec::new(),
            degraded: false,
            refinement_round: 0,
            results: Vec::new(),
            last_report: None,
            phase_retries: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 状态迁移；非法迁移属于编程错误
    pub fn transition(&mut self, next: Phase) -> Result<(), SupervisorError> {
        if !self.phase.can_transition_to(next) {
            return Err(SupervisorError::Internal(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        tracing::debug!(run_id = %self.run_id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        Ok(())
    }

    pub fn refinement_round(&self) -> usize {
        self.refinement_round
    }

    /// 进入下一精炼轮；不允许超过 max_rounds
    pub fn begin_refinement_round(&mut self, max_rounds: usize) -> Result<usize, SupervisorError> {
        if self.refinement_round >= max_rounds {
            return Err(SupervisorError::Internal(format!(
                "refinement round {} would exceed limit {}",
                self.refinement_round + 1,
                max_rounds
            )));
        }
        self.refinement_round += 1;
        self.phase_retries = 0;
        Ok(self.refinement_round)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            task_id: self.task.id.clone(),
            phase_timings_ms: self.phase_timings.as_millis(),
            refinement_rounds: self.refinement_round,
            strategy: self.routing.as_ref().map(|d| d.strategy),
            fast_path: self.fast_path,
            degraded: self.degraded,
        }
    }
}
