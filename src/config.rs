//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__QUALITY__QUALITY_THRESHOLD=0.9`）。
//! 这里只负责「读」；数值范围校验在 [`crate::core::SupervisorSettings::from_config`] 中完成，越界直接报错而不是悄悄修正。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub agents: AgentsSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时（LlmOracle / LlmAgentExecutor 共用）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// 流水线档位：full 走完整阶段；light 只做启发式分析/路由，不做质量评估与精炼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineProfile {
    #[default]
    Full,
    Light,
}

/// [pipeline] 段：快速通道与自动并行阈值
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub profile: PipelineProfile,
    /// 词数不超过此值的任务直接走快速通道（不调用 oracle）
    #[serde(default = "default_simple_task_max_words")]
    pub simple_task_max_words: usize,
    /// 顺序策略下，互相独立的 agent 数达到此值时自动升级为并行
    #[serde(default = "default_auto_parallel_min_agents")]
    pub auto_parallel_min_agents: usize,
    /// 会话级分析缓存容量（条）
    #[serde(default = "default_analysis_cache_capacity")]
    pub analysis_cache_capacity: usize,
}

fn default_simple_task_max_words() -> usize {
    5
}

fn default_auto_parallel_min_agents() -> usize {
    3
}

fn default_analysis_cache_capacity() -> usize {
    256
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            profile: PipelineProfile::default(),
            simple_task_max_words: default_simple_task_max_words(),
            auto_parallel_min_agents: default_auto_parallel_min_agents(),
            analysis_cache_capacity: default_analysis_cache_capacity(),
        }
    }
}

/// [execution] 段：并发、重试与各阶段超时
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,
    /// 单个 agent 调用失败后的额外重试次数
    #[serde(default = "default_agent_retry_limit")]
    pub agent_retry_limit: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// 单个阶段（一次尝试）的硬超时（秒）
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,
    /// 阶段级重试预算（超时重试 / 顺序策略从失败步骤续跑）
    #[serde(default = "default_phase_retry_budget")]
    pub phase_retry_budget: u32,
    /// 阶段耗时超过此值时发出 slow_phase_warning（秒）
    #[serde(default = "default_slow_execution_threshold_secs")]
    pub slow_execution_threshold_secs: u64,
    /// 单次 oracle 调用超时（秒），超时视为 oracle 不可用
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
}

fn default_max_parallel_agents() -> usize {
    3
}

fn default_agent_retry_limit() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    8_000
}

fn default_phase_timeout_secs() -> u64 {
    300
}

fn default_phase_retry_budget() -> u32 {
    1
}

fn default_slow_execution_threshold_secs() -> u64 {
    30
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_parallel_agents: default_max_parallel_agents(),
            agent_retry_limit: default_agent_retry_limit(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            phase_timeout_secs: default_phase_timeout_secs(),
            phase_retry_budget: default_phase_retry_budget(),
            slow_execution_threshold_secs: default_slow_execution_threshold_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

/// [quality] 段：质量门槛、精炼轮数与 judge
#[derive(Debug, Clone, Deserialize)]
pub struct QualitySection {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// 首轮得分落在 [refinement_threshold, quality_threshold) 时直接带 caveat 返回，不再精炼
    #[serde(default = "default_quality_threshold")]
    pub refinement_threshold: f64,
    /// 相邻两轮得分提升低于此值即提前停止
    #[serde(default = "default_refinement_min_improvement")]
    pub refinement_min_improvement: f64,
    #[serde(default = "default_max_refinement_rounds")]
    pub max_refinement_rounds: usize,
    /// 是否启用 judge 复评（需外部提供 judge oracle）
    #[serde(default)]
    pub judge_enabled: bool,
    #[serde(default = "default_judge_timeout_seconds")]
    pub judge_timeout_seconds: u64,
}

fn default_quality_threshold() -> f64 {
    0.8
}

fn default_refinement_min_improvement() -> f64 {
    0.05
}

fn default_max_refinement_rounds() -> usize {
    3
}

fn default_judge_timeout_seconds() -> u64 {
    20
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            refinement_threshold: default_quality_threshold(),
            refinement_min_improvement: default_refinement_min_improvement(),
            max_refinement_rounds: default_max_refinement_rounds(),
            judge_enabled: false,
            judge_timeout_seconds: default_judge_timeout_seconds(),
        }
    }
}

/// [agents] 段：兜底 agent 与可选的团队名单覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsSection {
    /// 路由结果为空时使用的 agent
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// 为空时使用内置名单（Researcher / Analyst / Coder / Writer / Generalist）
    #[serde(default)]
    pub roster: Vec<AgentEntry>,
}

fn default_agent() -> String {
    "Generalist".to_string()
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            roster: Vec::new(),
        }
    }
}

/// [[agents.roster]] 条目
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub system_prompt: Option<String>,
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 则追加该文件（可覆盖前面的键），文件不存在时报错
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    // 用户显式给出的路径必须存在
    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.profile, PipelineProfile::Full);
        assert_eq!(cfg.execution.max_parallel_agents, 3);
        assert_eq!(cfg.quality.max_refinement_rounds, 3);
        assert!((cfg.quality.quality_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.agents.default_agent, "Generalist");
        assert!(cfg.agents.roster.is_empty());
    }

    #[test]
    fn test_profile_deserialize() {
        let p: PipelineProfile = serde_json::from_str("\"light\"").unwrap();
        assert_eq!(p, PipelineProfile::Light);
    }
}
