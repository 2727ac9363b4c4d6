//! QualityGate：主评估 + 可选 judge 复评
//!
//! 两者并发执行，各自有硬超时。judge 超时或出错只记录在 verdict 中，不影响主报告；
//! 主评估失败时报告降级（空输出 0 分，否则按阈值计），由 RefinementLoop 附加 "quality unverified" 说明。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{OracleError, SupervisorError, SupervisorSettings};
use crate::oracle::ReasoningOracle;
use crate::pipeline::{JudgeVerdict, QualityAssessment, QualityCriteria, QualityReport, Task};

pub struct QualityGate {
    oracle: Arc<dyn ReasoningOracle>,
    judge: Option<Arc<dyn ReasoningOracle>>,
    oracle_timeout: Duration,
    judge_timeout: Duration,
}

impl QualityGate {
    /// judge 为 Some 时启用复评
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        judge: Option<Arc<dyn ReasoningOracle>>,
        settings: &SupervisorSettings,
    ) -> Self {
        Self {
            oracle,
            judge,
            oracle_timeout: settings.oracle_timeout,
            judge_timeout: settings.judge_timeout,
        }
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    pub async fn assess(
        &self,
        task: &Task,
        output: &str,
        criteria: &QualityCriteria,
        cancel: &CancellationToken,
    ) -> Result<QualityReport, SupervisorError> {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }

        let primary = async {
            match tokio::time::timeout(
                self.oracle_timeout,
                self.oracle.assess_quality(task, output, criteria),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(OracleError::Timeout),
            }
        };
        let judge = async {
            let Some(judge) = &self.judge else {
                return (JudgeVerdict::NotConfigured, Vec::new());
            };
            match tokio::time::timeout(self.judge_timeout, judge.assess_quality(task, output, criteria)).await {
                Ok(Ok(a)) if a.score.is_finite() => (
                    JudgeVerdict::Scored {
                        score: a.score.clamp(0.0, 1.0),
                    },
                    a.missing_elements,
                ),
                Ok(Ok(a)) => (
                    JudgeVerdict::Failed {
                        reason: format!("non-finite judge score {}", a.score),
                    },
                    Vec::new(),
                ),
                Ok(Err(e)) => (JudgeVerdict::Failed { reason: e.to_string() }, Vec::new()),
                Err(_) => (JudgeVerdict::TimedOut, Vec::new()),
            }
        };

        let (primary, (judge, judge_missing)) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
            pair = async { tokio::join!(primary, judge) } => pair,
        };

        match &judge {
            JudgeVerdict::TimedOut => {
                warn!(timeout_ms = self.judge_timeout.as_millis() as u64, "Judge timed out, using primary assessment")
            }
            JudgeVerdict::Failed { reason } => warn!(%reason, "Judge failed, using primary assessment"),
            _ => {}
        }

        let report = match primary {
            Ok(a) if a.score.is_finite() => Self::combine(a, judge, judge_missing, criteria),
            Ok(a) => Self::degraded(
                output,
                criteria,
                judge,
                &format!("non-finite score {}", a.score),
            ),
            Err(e) => {
                warn!(error = %e, "Quality assessment failed, score is unverified");
                Self::degraded(output, criteria, judge, &e.to_string())
            }
        };

        info!(
            score = report.score,
            passed = report.passed,
            degraded = report.degraded,
            "Quality assessed"
        );
        Ok(report)
    }

    /// 主评估与 judge 合并：分数取均值，缺失项去重合并（主评估在前）
    fn combine(
        primary: QualityAssessment,
        judge: JudgeVerdict,
        judge_missing: Vec<String>,
        criteria: &QualityCriteria,
    ) -> QualityReport {
        let primary_score = primary.score.clamp(0.0, 1.0);
        let score = match &judge {
            JudgeVerdict::Scored { score } => {
                debug!(primary = primary_score, judge = *score, "Averaging with judge score");
                (primary_score + score) / 2.0
            }
            _ => primary_score,
        };
        let mut missing: Vec<String> = Vec::new();
        for m in primary.missing_elements.into_iter().chain(judge_missing) {
            let m = m.trim().to_string();
            if !m.is_empty() && !missing.contains(&m) {
                missing.push(m);
            }
        }
        QualityReport {
            score,
            missing_elements: missing,
            critique: primary.critique,
            passed: score >= criteria.threshold,
            degraded: false,
            judge,
            warnings: criteria.warnings.clone(),
        }
    }

    fn degraded(output: &str, criteria: &QualityCriteria, judge: JudgeVerdict, reason: &str) -> QualityReport {
        let score = if output.trim().is_empty() {
            0.0
        } else {
            criteria.threshold
        };
        QualityReport {
            score,
            missing_elements: vec![],
            critique: format!("Quality could not be verified: {reason}"),
            passed: score >= criteria.threshold,
            degraded: true,
            judge,
            warnings: criteria.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;
    use crate::pipeline::EdgeCaseWarning;

    fn criteria() -> QualityCriteria {
        QualityCriteria {
            threshold: 0.8,
            required_capabilities: vec!["research".into()],
            warnings: vec![EdgeCaseWarning::UncoveredCapability {
                capability: "code".into(),
            }],
            degraded_analysis: false,
        }
    }

    fn settings(judge_timeout: Duration) -> SupervisorSettings {
        SupervisorSettings {
            judge_enabled: true,
            judge_timeout,
            oracle_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_primary_only() {
        let oracle = Arc::new(MockOracle::new().with_scores(vec![0.6]));
        let gate = QualityGate::new(oracle, None, &SupervisorSettings::default());
        let r = gate
            .assess(&Task::new("t"), "answer", &criteria(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.score, 0.6);
        assert!(!r.passed);
        assert_eq!(r.judge, JudgeVerdict::NotConfigured);
        assert_eq!(r.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_judge_averaged() {
        let oracle = Arc::new(MockOracle::new().with_scores(vec![0.6]));
        let judge = Arc::new(MockOracle::new().with_scores(vec![1.0]));
        let gate = QualityGate::new(oracle, Some(judge), &settings(Duration::from_secs(1)));
        let r = gate
            .assess(&Task::new("t"), "answer", &criteria(), &CancellationToken::new())
            .await
            .unwrap();
        assert!((r.score - 0.8).abs() < 1e-9);
        assert!(r.passed);
        assert_eq!(r.judge, JudgeVerdict::Scored { score: 1.0 });
    }

    #[tokio::test]
    async fn test_missing_elements_merged_with_judge() {
        let oracle = Arc::new(
            MockOracle::new()
                .with_scores(vec![0.7])
                .with_missing(vec!["sources".into(), " totals ".into()]),
        );
        let judge = Arc::new(
            MockOracle::new()
                .with_scores(vec![0.9])
                .with_missing(vec!["totals".into(), "caveats".into(), "".into()]),
        );
        let gate = QualityGate::new(oracle, Some(judge), &settings(Duration::from_secs(1)));
        let r = gate
            .assess(&Task::new("t"), "answer", &criteria(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.missing_elements, vec!["sources", "totals", "caveats"]);
        assert!((r.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_judge_timeout_keeps_primary() {
        let oracle = Arc::new(MockOracle::new().with_scores(vec![0.9]));
        let judge = Arc::new(
            MockOracle::new()
                .with_scores(vec![0.1])
                .with_assess_delay(Duration::from_millis(300)),
        );
        let gate = QualityGate::new(oracle, Some(judge), &settings(Duration::from_millis(20)));
        let r = gate
            .assess(&Task::new("t"), "answer", &criteria(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.score, 0.9);
        assert_eq!(r.judge, JudgeVerdict::TimedOut);
        assert!(!r.degraded);
    }

    #[tokio::test]
    async fn test_primary_failure_degrades() {
        let oracle = Arc::new(MockOracle::new().failing_assess());
        let gate = QualityGate::new(oracle.clone(), None, &SupervisorSettings::default());
        let token = CancellationToken::new();
        let r = gate.assess(&Task::new("t"), "answer", &criteria(), &token).await.unwrap();
        assert!(r.degraded);
        assert_eq!(r.score, 0.8);
        assert!(r.critique.starts_with("Quality could not be verified"));

        let empty = gate.assess(&Task::new("t"), "  ", &criteria(), &token).await.unwrap();
        assert_eq!(empty.score, 0.0);
        assert!(!empty.passed);
    }

    #[tokio::test]
    async fn test_score_clamped() {
        let oracle = Arc::new(MockOracle::new().with_scores(vec![1.7]));
        let gate = QualityGate::new(oracle, None, &SupervisorSettings::default());
        let r = gate
            .assess(&Task::new("t"), "answer", &criteria(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.score, 1.0);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let oracle = Arc::new(MockOracle::new().with_assess_delay(Duration::from_secs(5)));
        let gate = QualityGate::new(oracle, None, &SupervisorSettings::default());
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });
        let err = gate
            .assess(&Task::new("t"), "answer", &criteria(), &token)
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::Cancelled);
    }
}
