//! 可编排的 Mock ReasoningOracle（测试与离线运行）
//!
//! 未设置脚本时：analyze / route 使用启发式结果，assess_quality 返回 1.0。
//! 分数序列按调用次序返回，用完后重复最后一个。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::{AgentRoster, ToolCatalog};
use crate::core::OracleError;
use crate::oracle::{HeuristicAnalyzer, ReasoningOracle};
use crate::pipeline::{
    AnalysisResult, Complexity, QualityAssessment, QualityCriteria, RouteProposal, Task,
};

#[derive(Debug, Default)]
pub struct MockOracle {
    analysis: Option<AnalysisResult>,
    route: Option<RouteProposal>,
    scores: Vec<f64>,
    missing: Vec<String>,
    fail_analyze: bool,
    fail_route: bool,
    fail_assess: bool,
    analyze_delay: Duration,
    assess_delay: Duration,
    analyze_calls: AtomicUsize,
    route_calls: AtomicUsize,
    assess_calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analysis(mut self, analysis: AnalysisResult) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_route(mut self, route: RouteProposal) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_scores(mut self, scores: Vec<f64>) -> Self {
        self.scores = scores;
        self
    }

    /// 每次评估都报告这些缺失项
    pub fn with_missing(mut self, missing: Vec<String>) -> Self {
        self.missing = missing;
        self
    }

    pub fn failing_analyze(mut self) -> Self {
        self.fail_analyze = true;
        self
    }

    pub fn failing_route(mut self) -> Self {
        self.fail_route = true;
        self
    }

    pub fn failing_assess(mut self) -> Self {
        self.fail_assess = true;
        self
    }

    /// 所有请求都失败（模拟 oracle 不可达）
    pub fn unreachable(self) -> Self {
        self.failing_analyze().failing_route().failing_assess()
    }

    pub fn with_analyze_delay(mut self, delay: Duration) -> Self {
        self.analyze_delay = delay;
        self
    }

    pub fn with_assess_delay(mut self, delay: Duration) -> Self {
        self.assess_delay = delay;
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::SeqCst)
    }

    pub fn assess_calls(&self) -> usize {
        self.assess_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.analyze_calls() + self.route_calls() + self.assess_calls()
    }
}

#[async_trait]
impl ReasoningOracle for MockOracle {
    async fn analyze(&self, task: &Task) -> Result<AnalysisResult, OracleError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if !self.analyze_delay.is_zero() {
            tokio::time::sleep(self.analyze_delay).await;
        }
        if self.fail_analyze {
            return Err(OracleError::Unavailable("mock oracle offline".into()));
        }
        Ok(self.analysis.clone().unwrap_or_else(|| {
            let mut a = HeuristicAnalyzer::analyze(task, false);
            a.complexity = Complexity::Medium;
            a
        }))
    }

    async fn route(
        &self,
        task: &Task,
        analysis: &AnalysisResult,
        roster: &AgentRoster,
        tools: &ToolCatalog,
    ) -> Result<RouteProposal, OracleError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_route {
            return Err(OracleError::Unavailable("mock oracle offline".into()));
        }
        Ok(self
            .route
            .clone()
            .unwrap_or_else(|| HeuristicAnalyzer::route(task, analysis, roster, tools)))
    }

    async fn assess_quality(
        &self,
        _task: &Task,
        output: &str,
        _criteria: &QualityCriteria,
    ) -> Result<QualityAssessment, OracleError> {
        let n = self.assess_calls.fetch_add(1, Ordering::SeqCst);
        if !self.assess_delay.is_zero() {
            tokio::time::sleep(self.assess_delay).await;
        }
        if self.fail_assess {
            return Err(OracleError::Timeout);
        }
        let score = self
            .scores
            .get(n)
            .or(self.scores.last())
            .copied()
            .unwrap_or(1.0);
        Ok(QualityAssessment {
            score,
            missing_elements: self.missing.clone(),
            critique: format!("mock assessment of {} chars", output.chars().count()),
        })
    }
}
