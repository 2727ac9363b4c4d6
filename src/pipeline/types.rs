//! 流水线数据模型：任务、分析结果、路由提议与决策、agent 分配与结果、质量报告、运行结果

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ErrorKind, Phase};
use crate::memory::Message;

/// 不可变的任务输入
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    /// 先前对话（可为空）
    pub context: Vec<Message>,
    pub created_at: i64,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4()),
            text: text.into(),
            context: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_context(mut self, context: Vec<Message>) -> Self {
        self.context = context;
        self
    }

    /// 分析缓存键：去首尾空白，保留大小写
    pub fn normalized_key(&self) -> String {
        self.text.trim().to_string()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// 分解出的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisStep {
    pub description: String,
    /// 该步骤需要的能力（如 web_search / computation）
    #[serde(default)]
    pub capability: Option<String>,
    /// 依赖的更早步骤下标
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// 任务分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    pub complexity: Complexity,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub steps: Vec<AnalysisStep>,
    #[serde(default)]
    pub needs_web_search: bool,
    /// oracle 失败后由启发式产出
    #[serde(default)]
    #[schemars(skip)]
    pub degraded: bool,
}

impl AnalysisResult {
    pub fn requires(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// 是否有步骤声明了对更早步骤的数据依赖
    pub fn has_step_dependencies(&self) -> bool {
        self.steps.iter().any(|s| !s.depends_on.is_empty())
    }
}

/// 执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Delegated,
    Sequential,
    Parallel,
}

impl Strategy {
    /// 去空白、忽略大小写解析；无法识别返回 None
    pub fn parse(raw: &str) -> Option<Strategy> {
        match raw.trim().to_lowercase().as_str() {
            "delegated" => Some(Strategy::Delegated),
            "sequential" => Some(Strategy::Sequential),
            "parallel" => Some(Strategy::Parallel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Delegated => "delegated",
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// oracle 提议的单个 agent（未经校验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProposedAgent {
    /// agent 名（应来自团队名单）
    pub name: String,
    /// 交给该 agent 的指令
    #[serde(default)]
    pub instruction: String,
    /// 计划使用的工具名
    #[serde(default)]
    pub tools: Vec<String>,
    /// 依赖的其他 agent 名（需要它们的输出）
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// oracle 返回的原始路由提议
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct RouteProposal {
    #[serde(default)]
    pub agents: Vec<ProposedAgent>,
    /// delegated / sequential / parallel
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub rationale: String,
}

/// 规范化后的单个 agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedAgent {
    /// 团队名单中的规范名
    pub name: String,
    pub instruction: String,
    pub tools: Vec<String>,
    pub depends_on: Vec<String>,
}

/// 规范化后的路由决策
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub agents: Vec<RoutedAgent>,
    pub strategy: Strategy,
    pub rationale: String,
}

impl RoutingDecision {
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn has_dependencies(&self) -> bool {
        self.agents.iter().any(|a| !a.depends_on.is_empty())
    }
}

impl From<&RoutingDecision> for RouteProposal {
    fn from(d: &RoutingDecision) -> Self {
        RouteProposal {
            agents: d
                .agents
                .iter()
                .map(|a| ProposedAgent {
                    name: a.name.clone(),
                    instruction: a.instruction.clone(),
                    tools: a.tools.clone(),
                    depends_on: a.depends_on.clone(),
                })
                .collect(),
            strategy: d.strategy.as_str().to_string(),
            rationale: d.rationale.clone(),
        }
    }
}

/// 路由阶段的非致命提示，最终交给 QualityGate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeCaseWarning {
    UnknownAgent { name: String },
    DuplicateAgent { name: String },
    InvalidStrategy { value: String },
    EmptyAgentList { fallback: String },
    DelegatedWithMultipleAgents { count: usize },
    AutoParallelized { agents: usize },
    ParallelWithDependencies { dependents: Vec<String> },
    UnknownTool { agent: String, tool: String },
    UncoveredCapability { capability: String },
    NoToolsForCapability { capability: String },
    ConflictingRequirements { detail: String },
}

impl fmt::Display for EdgeCaseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeCaseWarning::UnknownAgent { name } => write!(f, "unknown agent '{}' dropped", name),
            EdgeCaseWarning::DuplicateAgent { name } => {
                write!(f, "duplicate agent '{}' dropped", name)
            }
            EdgeCaseWarning::InvalidStrategy { value } => {
                write!(f, "invalid strategy '{}', using sequential", value)
            }
            EdgeCaseWarning::EmptyAgentList { fallback } => {
                write!(f, "no agents selected, delegating to '{}'", fallback)
            }
            EdgeCaseWarning::DelegatedWithMultipleAgents { count } => {
                write!(f, "delegated strategy with {} agents, using sequential", count)
            }
            EdgeCaseWarning::AutoParallelized { agents } => {
                write!(f, "{} independent agents, upgraded to parallel", agents)
            }
            EdgeCaseWarning::ParallelWithDependencies { dependents } => write!(
                f,
                "parallel strategy but {} depend on other agents, using sequential",
                dependents.join(", ")
            ),
            EdgeCaseWarning::UnknownTool { agent, tool } => {
                write!(f, "unknown tool '{}' dropped from '{}'", tool, agent)
            }
            EdgeCaseWarning::UncoveredCapability { capability } => {
                write!(f, "capability '{}' not covered by any selected agent", capability)
            }
            EdgeCaseWarning::NoToolsForCapability { capability } => {
                write!(f, "no tools available for capability '{}'", capability)
            }
            EdgeCaseWarning::ConflictingRequirements { detail } => {
                write!(f, "conflicting requirements: {}", detail)
            }
        }
    }
}

/// 路由阶段产出
#[derive(Debug, Clone)]
pub struct RouterOutcome {
    pub decision: RoutingDecision,
    pub warnings: Vec<EdgeCaseWarning>,
    /// oracle 失败后使用了启发式路由
    pub degraded: bool,
}

/// 派发给 AgentExecutor 的工作单元
#[derive(Debug, Clone, Serialize)]
pub struct AgentAssignment {
    /// 在路由决策中的下标
    pub index: usize,
    pub agent: String,
    pub instruction: String,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<RefinementFeedback>,
}

impl AgentAssignment {
    pub fn with_feedback(mut self, feedback: RefinementFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// 指令全文：原指令 + 精炼反馈（若有）
    pub fn render_instruction(&self) -> String {
        match &self.feedback {
            None => self.instruction.clone(),
            Some(fb) => format!(
                "{}\n\n[Refinement round {}]\n{}\n\nPrevious answer:\n{}",
                self.instruction, fb.round, fb.critique, fb.previous_output
            ),
        }
    }
}

/// 单个 agent 的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    pub agent: String,
    pub index: usize,
    pub output: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

impl AgentResult {
    pub fn success(a: &AgentAssignment, output: String, elapsed_ms: u64, attempts: u32) -> Self {
        Self {
            agent: a.agent.clone(),
            index: a.index,
            output,
            success: true,
            error: None,
            elapsed_ms,
            attempts,
        }
    }

    pub fn failure(a: &AgentAssignment, error: String, elapsed_ms: u64, attempts: u32) -> Self {
        Self {
            agent: a.agent.clone(),
            index: a.index,
            output: String::new(),
            success: false,
            error: Some(error),
            elapsed_ms,
            attempts,
        }
    }
}

/// 质量评估标准
#[derive(Debug, Clone, Serialize)]
pub struct QualityCriteria {
    pub threshold: f64,
    pub required_capabilities: Vec<String>,
    pub warnings: Vec<EdgeCaseWarning>,
    pub degraded_analysis: bool,
}

/// oracle 给出的原始质量评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityAssessment {
    /// 0.0 ~ 1.0
    pub score: f64,
    #[serde(default)]
    pub missing_elements: Vec<String>,
    #[serde(default)]
    pub critique: String,
}

/// judge 复评结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JudgeVerdict {
    NotConfigured,
    Scored { score: f64 },
    TimedOut,
    Failed { reason: String },
}

/// 质量报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub score: f64,
    pub missing_elements: Vec<String>,
    pub critique: String,
    pub passed: bool,
    /// 主评估失败，分数未经验证
    pub degraded: bool,
    pub judge: JudgeVerdict,
    pub warnings: Vec<EdgeCaseWarning>,
}

/// 下一轮精炼携带的反馈
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementFeedback {
    pub round: usize,
    pub previous_output: String,
    pub report: QualityReport,
    /// 给 agent 看的改进要点
    pub critique: String,
}

impl RefinementFeedback {
    pub fn new(round: usize, previous_output: String, report: QualityReport, threshold: f64) -> Self {
        let mut critique = format!(
            "The previous answer scored {:.2}, below the required {:.2}.",
            report.score, threshold
        );
        if !report.missing_elements.is_empty() {
            critique.push_str(&format!(" Missing: {}.", report.missing_elements.join("; ")));
        }
        if !report.critique.trim().is_empty() {
            critique.push_str(&format!(" Reviewer notes: {}", report.critique.trim()));
        }
        Self {
            round,
            previous_output,
            report,
            critique,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaveatReason {
    /// 相邻两轮提升不足
    DiminishingReturns,
    RoundsExhausted,
    /// 首轮分数在 [refinement_threshold, quality_threshold) 内，直接接受
    BelowQualityThreshold,
    /// 主评估失败，分数未验证
    QualityUnverified,
    /// 精炼轮执行失败，回退到历史最佳
    RefinementAborted,
}

/// 附在尽力而为结果上的质量说明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityCaveat {
    pub reason: CaveatReason,
    pub best_score: f64,
    pub threshold: f64,
    pub rounds: usize,
}

/// 运行摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub task_id: String,
    pub phase_timings_ms: BTreeMap<Phase, u64>,
    pub refinement_rounds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub fast_path: bool,
    /// 分析或路由使用了启发式降级
    pub degraded: bool,
}

/// 成功（或尽力而为）的回答
#[derive(Debug, Clone, Serialize)]
pub struct RunAnswer {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caveat: Option<QualityCaveat>,
    pub results: Vec<AgentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<QualityReport>,
    pub warnings: Vec<EdgeCaseWarning>,
    pub summary: RunSummary,
}

/// 结构化失败：错误种类 + 发生阶段 + 部分诊断
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub phase: Phase,
    pub message: String,
    pub partial_results: Vec<AgentResult>,
    pub summary: RunSummary,
}

/// 一次运行的最终结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// 快速通道直接作答
    ResponseReady(RunAnswer),
    Complete(RunAnswer),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }

    pub fn answer(&self) -> Option<&RunAnswer> {
        match self {
            RunOutcome::ResponseReady(a) | RunOutcome::Complete(a) => Some(a),
            RunOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::ResponseReady(a) | RunOutcome::Complete(a) => &a.summary,
            RunOutcome::Failed(f) => &f.summary,
        }
    }

    /// 终止阶段
    pub fn phase(&self) -> Phase {
        match self {
            RunOutcome::ResponseReady(_) => Phase::ResponseReady,
            RunOutcome::Complete(_) => Phase::Complete,
            RunOutcome::Failed(_) => Phase::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_and_words() {
        let t = Task::new("  What is BTC Price  ");
        assert_eq!(t.normalized_key(), "What is BTC Price");
        assert_eq!(t.word_count(), 4);
        assert!(t.id.starts_with("task_"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse(" Parallel "), Some(Strategy::Parallel));
        assert_eq!(Strategy::parse("SEQUENTIAL"), Some(Strategy::Sequential));
        assert_eq!(Strategy::parse("round-robin"), None);
    }

    #[test]
    fn test_analysis_result_deserialize_defaults() {
        let a: AnalysisResult = serde_json::from_str(r#"{"complexity":"high"}"#).unwrap();
        assert_eq!(a.complexity, Complexity::High);
        assert!(a.capabilities.is_empty());
        assert!(!a.degraded);
    }

    #[test]
    fn test_render_instruction_with_feedback() {
        let report = QualityReport {
            score: 0.5,
            missing_elements: vec!["sources".into()],
            critique: "too vague".into(),
            passed: false,
            degraded: false,
            judge: JudgeVerdict::NotConfigured,
            warnings: vec![],
        };
        let fb = RefinementFeedback::new(1, "old answer".into(), report, 0.8);
        let a = AgentAssignment {
            index: 0,
            agent: "Writer".into(),
            instruction: "Write it".into(),
            tools: vec![],
            feedback: None,
        }
        .with_feedback(fb);
        let text = a.render_instruction();
        assert!(text.starts_with("Write it"));
        assert!(text.contains("Missing: sources"));
        assert!(text.contains("old answer"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = RunOutcome::Failed(RunFailure {
            kind: ErrorKind::Cancelled,
            phase: Phase::Execution,
            message: "Run cancelled".into(),
            partial_results: vec![],
            summary: RunSummary {
                run_id: "run_1".into(),
                task_id: "task_1".into(),
                phase_timings_ms: BTreeMap::new(),
                refinement_rounds: 0,
                strategy: None,
                fast_path: false,
                degraded: false,
            },
        });
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["kind"], "cancelled");
        assert_eq!(v["phase"], "execution");
    }
}
