//! RefinementLoop：有界精炼决策
//!
//! 每轮评估后调用 observe。规则按顺序：
//! 1. 报告降级（主评估失败）→ 接受并附 quality_unverified 说明
//! 2. score ≥ quality_threshold → 接受
//! 3. 首轮且 score ≥ refinement_threshold → 接受并附 below_quality_threshold 说明
//! 4. 精炼轮提升 < refinement_min_improvement → 停止（diminishing_returns）
//! 5. 已用完 max_refinement_rounds → 停止（rounds_exhausted）
//! 6. 否则携带反馈进入下一轮
//!
//! 停止时返回历史最高分的候选，而非最后一轮。

use tracing::{info, warn};

use crate::core::{SupervisorError, SupervisorSettings};
use crate::pipeline::{
    AgentResult, CaveatReason, QualityCaveat, QualityReport, RefinementFeedback,
};

/// 一轮执行 + 评估的产物
#[derive(Debug, Clone)]
pub struct Candidate {
    pub output: String,
    pub results: Vec<AgentResult>,
    pub report: QualityReport,
    pub round: usize,
}

impl Candidate {
    pub fn score(&self) -> f64 {
        self.report.score
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefinementDecision {
    Accept,
    AcceptWithCaveat(QualityCaveat),
    Refine(RefinementFeedback),
    /// 提前停止或轮数用尽；结果取 best
    Stop(QualityCaveat),
}

pub struct RefinementLoop {
    quality_threshold: f64,
    refinement_threshold: f64,
    min_improvement: f64,
    max_rounds: usize,
    round: usize,
    previous_score: Option<f64>,
    best: Option<Candidate>,
}

impl RefinementLoop {
    pub fn new(settings: &SupervisorSettings) -> Self {
        Self {
            quality_threshold: settings.quality_threshold,
            refinement_threshold: settings.refinement_threshold,
            min_improvement: settings.refinement_min_improvement,
            max_rounds: settings.max_refinement_rounds,
            round: 0,
            previous_score: None,
            best: None,
        }
    }

    /// 已开始的精炼轮数（首轮执行为 0）
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    pub fn take_best(&mut self) -> Option<Candidate> {
        self.best.take()
    }

    /// 开始下一轮精炼；超过上限返回 RefinementExhausted
    pub fn start_round(&mut self) -> Result<usize, SupervisorError> {
        if self.round >= self.max_rounds {
            return Err(SupervisorError::RefinementExhausted {
                rounds: self.round,
                best_score: self.best_score(),
            });
        }
        self.round += 1;
        Ok(self.round)
    }

    fn best_score(&self) -> f64 {
        self.best.as_ref().map(Candidate::score).unwrap_or(0.0)
    }

    fn caveat(&self, reason: CaveatReason) -> QualityCaveat {
        QualityCaveat {
            reason,
            best_score: self.best_score(),
            threshold: self.quality_threshold,
            rounds: self.round,
        }
    }

    fn keep_if_best(&mut self, candidate: Candidate) {
        let replace = match &self.best {
            None => true,
            // 未经验证的分数不覆盖已验证的候选
            Some(_) if candidate.report.degraded => false,
            Some(best) => candidate.score() > best.score(),
        };
        if replace {
            self.best = Some(candidate);
        }
    }

    pub fn observe(&mut self, candidate: Candidate) -> RefinementDecision {
        let score = candidate.score();
        let degraded = candidate.report.degraded;
        let previous = self.previous_score;
        if !degraded {
            self.previous_score = Some(score);
        }
        let output = candidate.output.clone();
        let report = candidate.report.clone();
        self.keep_if_best(candidate);

        if degraded {
            return RefinementDecision::AcceptWithCaveat(self.caveat(CaveatReason::QualityUnverified));
        }
        if score >= self.quality_threshold {
            info!(score, round = self.round, "Quality threshold met");
            return RefinementDecision::Accept;
        }
        if self.round == 0 && score >= self.refinement_threshold {
            info!(score, threshold = self.quality_threshold, "Accepting below-threshold first pass");
            return RefinementDecision::AcceptWithCaveat(self.caveat(CaveatReason::BelowQualityThreshold));
        }
        if self.round > 0 {
            if let Some(prev) = previous {
                if score - prev < self.min_improvement {
                    return self.stop(CaveatReason::DiminishingReturns);
                }
            }
        }
        if self.round >= self.max_rounds {
            return self.stop(CaveatReason::RoundsExhausted);
        }

        RefinementDecision::Refine(RefinementFeedback::new(
            self.round + 1,
            output,
            report,
            self.quality_threshold,
        ))
    }

    fn stop(&self, reason: CaveatReason) -> RefinementDecision {
        let err = SupervisorError::RefinementExhausted {
            rounds: self.round,
            best_score: self.best_score(),
        };
        warn!(error = %err, reason = ?reason, "Stopping refinement, returning best result");
        RefinementDecision::Stop(self.caveat(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JudgeVerdict;

    fn settings(max_rounds: usize) -> SupervisorSettings {
        SupervisorSettings {
            quality_threshold: 0.8,
            refinement_threshold: 0.8,
            refinement_min_improvement: 0.05,
            max_refinement_rounds: max_rounds,
            ..Default::default()
        }
    }

    fn candidate(round: usize, score: f64) -> Candidate {
        Candidate {
            output: format!("answer {round}"),
            results: vec![],
            report: QualityReport {
                score,
                missing_elements: vec!["sources".into()],
                critique: "thin".into(),
                passed: score >= 0.8,
                degraded: false,
                judge: JudgeVerdict::NotConfigured,
                warnings: vec![],
            },
            round,
        }
    }

    #[test]
    fn test_accept_on_first_pass() {
        let mut l = RefinementLoop::new(&settings(3));
        assert_eq!(l.observe(candidate(0, 0.9)), RefinementDecision::Accept);
        assert_eq!(l.take_best().unwrap().output, "answer 0");
    }

    #[test]
    fn test_diminishing_returns_stops_after_one_round() {
        let mut l = RefinementLoop::new(&settings(3));
        let RefinementDecision::Refine(feedback) = l.observe(candidate(0, 0.6)) else {
            panic!("expected refine");
        };
        assert_eq!(feedback.round, 1);
        assert_eq!(feedback.previous_output, "answer 0");
        assert!(feedback.critique.contains("Missing: sources"));

        assert_eq!(l.start_round().unwrap(), 1);
        let RefinementDecision::Stop(caveat) = l.observe(candidate(1, 0.62)) else {
            panic!("expected stop");
        };
        assert_eq!(caveat.reason, CaveatReason::DiminishingReturns);
        assert_eq!(caveat.rounds, 1);
        assert!((caveat.best_score - 0.62).abs() < 1e-9);
        assert_eq!(l.take_best().unwrap().output, "answer 1");
    }

    #[test]
    fn test_best_not_last() {
        let mut l = RefinementLoop::new(&settings(3));
        l.observe(candidate(0, 0.5));
        l.start_round().unwrap();
        assert!(matches!(l.observe(candidate(1, 0.7)), RefinementDecision::Refine(_)));
        l.start_round().unwrap();
        let RefinementDecision::Stop(caveat) = l.observe(candidate(2, 0.65)) else {
            panic!("expected stop");
        };
        assert!((caveat.best_score - 0.7).abs() < 1e-9);
        assert_eq!(l.best().unwrap().round, 1);
    }

    #[test]
    fn test_rounds_bounded() {
        let mut l = RefinementLoop::new(&settings(2));
        let mut score = 0.1;
        let mut refinements = 0;
        let mut round = 0;
        loop {
            match l.observe(candidate(round, score)) {
                RefinementDecision::Refine(_) => {
                    round = l.start_round().unwrap();
                    refinements += 1;
                    score += 0.2;
                }
                RefinementDecision::Stop(c) => {
                    assert_eq!(c.reason, CaveatReason::RoundsExhausted);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(refinements, 2);
        assert!(matches!(
            l.start_round(),
            Err(SupervisorError::RefinementExhausted { rounds: 2, .. })
        ));
    }

    #[test]
    fn test_zero_rounds_stops_immediately() {
        let mut l = RefinementLoop::new(&settings(0));
        assert!(matches!(
            l.observe(candidate(0, 0.3)),
            RefinementDecision::Stop(QualityCaveat {
                reason: CaveatReason::RoundsExhausted,
                ..
            })
        ));
    }

    #[test]
    fn test_refinement_threshold_band() {
        let s = SupervisorSettings {
            refinement_threshold: 0.7,
            ..settings(3)
        };
        let mut l = RefinementLoop::new(&s);
        assert!(matches!(
            l.observe(candidate(0, 0.75)),
            RefinementDecision::AcceptWithCaveat(QualityCaveat {
                reason: CaveatReason::BelowQualityThreshold,
                ..
            })
        ));
    }

    #[test]
    fn test_degraded_report_is_unverified() {
        let mut l = RefinementLoop::new(&settings(3));
        let mut c = candidate(0, 0.8);
        c.report.degraded = true;
        assert!(matches!(
            l.observe(c),
            RefinementDecision::AcceptWithCaveat(QualityCaveat {
                reason: CaveatReason::QualityUnverified,
                ..
            })
        ));
    }

    #[test]
    fn test_degraded_refinement_keeps_verified_best() {
        let mut l = RefinementLoop::new(&settings(3));
        l.observe(candidate(0, 0.6));
        l.start_round().unwrap();
        let mut c = candidate(1, 0.8);
        c.report.degraded = true;
        l.observe(c);
        assert_eq!(l.best().unwrap().round, 0);
    }
}
