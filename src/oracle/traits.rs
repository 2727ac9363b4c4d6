//! ReasoningOracle 抽象：分析、路由、质量评估三类请求
//!
//! 任何一个调用都可能很慢或瞬时失败；调用方负责超时与降级。

use async_trait::async_trait;

use crate::agents::{AgentRoster, ToolCatalog};
use crate::core::OracleError;
use crate::pipeline::{AnalysisResult, QualityAssessment, QualityCriteria, RouteProposal, Task};

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// 分解任务：复杂度、所需能力、步骤
    async fn analyze(&self, task: &Task) -> Result<AnalysisResult, OracleError>;

    /// 根据分析结果、团队名单与工具目录给出路由提议（未经校验）
    async fn route(
        &self,
        task: &Task,
        analysis: &AnalysisResult,
        roster: &AgentRoster,
        tools: &ToolCatalog,
    ) -> Result<RouteProposal, OracleError>;

    /// 为一个候选答案打分
    async fn assess_quality(
        &self,
        task: &Task,
        output: &str,
        criteria: &QualityCriteria,
    ) -> Result<QualityAssessment, OracleError>;
}
