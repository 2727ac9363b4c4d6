//! 阶段状态机与阶段耗时
//!
//! INTAKE → FAST_PATH → RESPONSE_READY，或
//! INTAKE → ANALYSIS → ROUTING → EXECUTION → PROGRESS → QUALITY → (REFINEMENT → EXECUTION)* → COMPLETE。
//! PROGRESS → EXECUTION 用于「从失败步骤续跑」；PROGRESS → COMPLETE 用于精炼轮失败时返回历史最佳结果。
//! 任何非终态都可以进入 FAILED。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Supervisor 阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    FastPath,
    Analysis,
    Routing,
    Execution,
    Progress,
    Quality,
    Refinement,
    ResponseReady,
    Complete,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::FastPath => "fast_path",
            Phase::Analysis => "analysis",
            Phase::Routing => "routing",
            Phase::Execution => "execution",
            Phase::Progress => "progress",
            Phase::Quality => "quality",
            Phase::Refinement => "refinement",
            Phase::ResponseReady => "response_ready",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// 终态：RESPONSE_READY / COMPLETE / FAILED
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::ResponseReady | Phase::Complete | Phase::Failed)
    }

    /// 是否允许从 self 迁移到 next
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Intake, FastPath)
                | (Intake, Analysis)
                | (FastPath, ResponseReady)
                | (Analysis, Routing)
                | (Routing, Execution)
                | (Execution, Progress)
                | (Progress, Quality)
                | (Progress, Execution)
                | (Progress, Complete)
                | (Quality, Refinement)
                | (Quality, Complete)
                | (Refinement, Execution)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每个阶段累计的墙钟耗时（重试与精炼轮会累加到同一阶段）
#[derive(Debug, Clone, Default)]
pub struct PhaseTimings {
    durations: BTreeMap<Phase, Duration>,
}

impl PhaseTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        *self.durations.entry(phase).or_default() += elapsed;
    }

    pub fn get(&self, phase: Phase) -> Option<Duration> {
        self.durations.get(&phase).copied()
    }

    pub fn total(&self) -> Duration {
        self.durations.values().sum()
    }

    /// 毫秒视图，用于 RunSummary 序列化
    pub fn as_millis(&self) -> BTreeMap<Phase, u64> {
        self.durations
            .iter()
            .map(|(p, d)| (*p, d.as_millis() as u64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_path_transitions() {
        let path = [
            Phase::Intake,
            Phase::Analysis,
            Phase::Routing,
            Phase::Execution,
            Phase::Progress,
            Phase::Quality,
            Phase::Refinement,
            Phase::Execution,
            Phase::Progress,
            Phase::Quality,
            Phase::Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Phase::Intake.can_transition_to(Phase::Quality));
        assert!(!Phase::FastPath.can_transition_to(Phase::Quality));
        assert!(!Phase::Complete.can_transition_to(Phase::Failed));
        assert!(!Phase::Failed.can_transition_to(Phase::Intake));
        assert!(Phase::Execution.can_transition_to(Phase::Failed));
    }

    #[test]
    fn test_timings_accumulate() {
        let mut t = PhaseTimings::new();
        t.record(Phase::Execution, Duration::from_millis(10));
        t.record(Phase::Execution, Duration::from_millis(5));
        t.record(Phase::Quality, Duration::from_millis(1));
        assert_eq!(t.get(Phase::Execution), Some(Duration::from_millis(15)));
        assert_eq!(t.total(), Duration::from_millis(16));
        assert_eq!(t.as_millis().get(&Phase::Quality), Some(&1));
    }
}
