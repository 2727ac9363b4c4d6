//! Supervisor 构建器：统一组装 oracle / executor / 名单 / 会话
//!
//! 设置不在这里校验：越界配置要在运行的 intake 阶段以 ConfigurationInvalid 失败，
//! 且不能触发任何 oracle 调用。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agents::{AgentExecutor, AgentRoster, LlmAgentExecutor, ToolCatalog};
use crate::config::AppConfig;
use crate::core::{
    AgentScheduler, RecoveryEngine, SessionSupervisor, Supervisor, SupervisorError,
    SupervisorSettings,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::oracle::{LlmOracle, ReasoningOracle};
use crate::pipeline::{ExecutionCoordinator, ProgressTracker, QualityGate, Router, RunEvent, TaskIntake};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// 按配置与环境变量选择 LLM 后端；没有可用的 API Key 时返回 None
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.request_timeout_secs);

    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Some(Arc::new(MockLlmClient::new()));
    }

    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), deepseek_key, openai_key) {
        ("deepseek", Some(key), _) | ("deepseek", None, Some(key)) => {
            let base = cfg.llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Some(Arc::new(
                OpenAiClient::new(Some(base), &cfg.llm.model, Some(&key)).with_timeout(timeout),
            ))
        }
        (_, _, Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Some(Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_timeout(timeout),
            ))
        }
        _ => {
            tracing::warn!("No API key set for provider '{}'", provider);
            None
        }
    }
}

pub struct SupervisorBuilder {
    settings: SupervisorSettings,
    roster: Option<AgentRoster>,
    tools: Option<ToolCatalog>,
    oracle: Option<Arc<dyn ReasoningOracle>>,
    judge: Option<Arc<dyn ReasoningOracle>>,
    executor: Option<Arc<dyn AgentExecutor>>,
    llm: Option<Arc<dyn LlmClient>>,
    session: Option<SessionSupervisor>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl SupervisorBuilder {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            roster: None,
            tools: None,
            oracle: None,
            judge: None,
            executor: None,
            llm: None,
            session: None,
            events: None,
        }
    }

    /// 从应用配置创建（设置与名单都取自配置，尚未校验）
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(SupervisorSettings::from(cfg)).with_roster(AgentRoster::from_config(&cfg.agents))
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ReasoningOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// 单独的 judge；未设置且 judge_enabled 时复用主 oracle
    pub fn with_judge(mut self, judge: Arc<dyn ReasoningOracle>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// 未显式设置 oracle / executor 时，用该 LLM 构建两者
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_roster(mut self, roster: AgentRoster) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_tools(mut self, tools: ToolCatalog) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 共享会话（跨 Supervisor 复用取消令牌与分析缓存）
    pub fn with_session(mut self, session: SessionSupervisor) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        let settings = self.settings;
        let roster = Arc::new(self.roster.unwrap_or_else(AgentRoster::builtin));
        let tools = Arc::new(self.tools.unwrap_or_else(ToolCatalog::builtin));

        let oracle: Arc<dyn ReasoningOracle> = match (self.oracle, &self.llm) {
            (Some(oracle), _) => oracle,
            (None, Some(llm)) => Arc::new(LlmOracle::new(llm.clone())),
            (None, None) => {
                return Err(SupervisorError::ConfigurationInvalid(
                    "no reasoning oracle configured".into(),
                ))
            }
        };
        let executor: Arc<dyn AgentExecutor> = match (self.executor, &self.llm) {
            (Some(executor), _) => executor,
            (None, Some(llm)) => Arc::new(LlmAgentExecutor::new(llm.clone(), roster.clone())),
            (None, None) => {
                return Err(SupervisorError::ConfigurationInvalid(
                    "no agent executor configured".into(),
                ))
            }
        };
        let judge = settings
            .judge_enabled
            .then(|| self.judge.unwrap_or_else(|| oracle.clone()));

        let session = self
            .session
            .unwrap_or_else(|| SessionSupervisor::new(settings.analysis_cache_capacity));
        let recovery = RecoveryEngine::new(settings.retry, settings.phase_retry_budget);
        let scheduler = AgentScheduler::new(settings.max_parallel_agents);

        Ok(Supervisor {
            intake: TaskIntake::new(oracle.clone(), session.cache(), recovery.clone(), &settings),
            router: Router::new(oracle.clone(), roster.clone(), tools, recovery.clone(), &settings),
            coordinator: ExecutionCoordinator::new(executor, scheduler, recovery.clone()),
            tracker: ProgressTracker::new(recovery, &settings),
            gate: QualityGate::new(oracle, judge, &settings),
            settings,
            roster,
            session,
            events: self.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::MockAgentExecutor;
    use crate::oracle::MockOracle;

    #[test]
    fn test_missing_oracle_is_invalid() {
        let err = SupervisorBuilder::new(SupervisorSettings::default())
            .with_executor(Arc::new(MockAgentExecutor::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::ConfigurationInvalid(_)));
    }

    #[test]
    fn test_llm_fills_both_collaborators() {
        let sup = SupervisorBuilder::new(SupervisorSettings::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .unwrap();
        assert_eq!(sup.roster().default_agent(), "Generalist");
    }

    #[test]
    fn test_judge_only_when_enabled() {
        let settings = SupervisorSettings {
            judge_enabled: true,
            ..Default::default()
        };
        let sup = SupervisorBuilder::new(settings)
            .with_oracle(Arc::new(MockOracle::new()))
            .with_executor(Arc::new(MockAgentExecutor::new()))
            .build()
            .unwrap();
        assert!(sup.has_judge());

        let sup = SupervisorBuilder::new(SupervisorSettings::default())
            .with_oracle(Arc::new(MockOracle::new()))
            .with_judge(Arc::new(MockOracle::new()))
            .with_executor(Arc::new(MockAgentExecutor::new()))
            .build()
            .unwrap();
        assert!(!sup.has_judge());
    }

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        assert!(create_llm_from_config(&cfg).is_some());
    }
}
