//! Router：调用 oracle.route 并把不可信的提议规范化为 RoutingDecision
//!
//! 规范化是幂等的：normalize(normalize(p)) == normalize(p)。
//! 所有异常情况都以 EdgeCaseWarning 附带返回，从不阻塞执行；oracle 失败时退回启发式路由。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{AgentRoster, ToolCatalog};
use crate::core::{OracleError, RecoveryEngine, SupervisorError, SupervisorSettings};
use crate::oracle::{HeuristicAnalyzer, ReasoningOracle};
use crate::pipeline::{
    AnalysisResult, EdgeCaseWarning, RoutedAgent, RouteProposal, RouterOutcome, RoutingDecision,
    Strategy, Task,
};

pub struct Router {
    oracle: Arc<dyn ReasoningOracle>,
    roster: Arc<AgentRoster>,
    tools: Arc<ToolCatalog>,
    recovery: RecoveryEngine,
    auto_parallel_min_agents: usize,
    oracle_timeout: Duration,
}

impl Router {
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        roster: Arc<AgentRoster>,
        tools: Arc<ToolCatalog>,
        recovery: RecoveryEngine,
        settings: &SupervisorSettings,
    ) -> Self {
        Self {
            oracle,
            roster,
            tools,
            recovery,
            auto_parallel_min_agents: settings.auto_parallel_min_agents,
            oracle_timeout: settings.oracle_timeout,
        }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// oracle 路由；失败或超时时退回启发式并标记 degraded
    pub async fn route(
        &self,
        task: &Task,
        analysis: &AnalysisResult,
        cancel: &CancellationToken,
    ) -> Result<RouterOutcome, SupervisorError> {
        let call = async {
            match tokio::time::timeout(
                self.oracle_timeout,
                self.oracle.route(task, analysis, &self.roster, &self.tools),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(OracleError::Timeout),
            }
        };
        let proposal = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SupervisorError::Cancelled),
            r = call => r,
        };

        let outcome = match proposal {
            Ok(p) => {
                let (decision, warnings) = self.normalize(&p, task, analysis);
                RouterOutcome {
                    decision,
                    warnings,
                    degraded: false,
                }
            }
            Err(e) => {
                self.recovery.on_oracle_error(&e);
                let mut outcome = self.route_heuristic(task, analysis);
                outcome.degraded = true;
                outcome
            }
        };

        info!(
            strategy = %outcome.decision.strategy,
            agents = ?outcome.decision.agent_names(),
            degraded = outcome.degraded,
            "Routing decided"
        );
        for w in &outcome.warnings {
            warn!(warning = %w, "Routing edge case");
        }
        Ok(outcome)
    }

    /// 启发式路由（快速通道 / 降级）
    pub fn route_heuristic(&self, task: &Task, analysis: &AnalysisResult) -> RouterOutcome {
        let proposal = HeuristicAnalyzer::route(task, analysis, &self.roster, &self.tools);
        let (decision, warnings) = self.normalize(&proposal, task, analysis);
        RouterOutcome {
            decision,
            warnings,
            degraded: false,
        }
    }

    pub fn normalize(
        &self,
        proposal: &RouteProposal,
        task: &Task,
        analysis: &AnalysisResult,
    ) -> (RoutingDecision, Vec<EdgeCaseWarning>) {
        normalize_proposal(
            proposal,
            task,
            analysis,
            &self.roster,
            &self.tools,
            self.auto_parallel_min_agents,
        )
    }
}

/// 规范化一个路由提议
pub fn normalize_proposal(
    proposal: &RouteProposal,
    task: &Task,
    analysis: &AnalysisResult,
    roster: &AgentRoster,
    tools: &ToolCatalog,
    auto_parallel_min_agents: usize,
) -> (RoutingDecision, Vec<EdgeCaseWarning>) {
    let mut warnings = Vec::new();

    // 1. agent 名：忽略大小写匹配名单，丢弃未知与重复
    let mut agents: Vec<RoutedAgent> = Vec::new();
    for p in &proposal.agents {
        let Some(profile) = roster.resolve(&p.name) else {
            warnings.push(EdgeCaseWarning::UnknownAgent {
                name: p.name.clone(),
            });
            continue;
        };
        if agents.iter().any(|a| a.name == profile.name) {
            warnings.push(EdgeCaseWarning::DuplicateAgent {
                name: profile.name.clone(),
            });
            continue;
        }

        let mut planned = Vec::new();
        for t in &p.tools {
            match tools.resolve(t) {
                Some(spec) if !planned.contains(&spec.name) => planned.push(spec.name.clone()),
                Some(_) => {}
                None => warnings.push(EdgeCaseWarning::UnknownTool {
                    agent: profile.name.clone(),
                    tool: t.clone(),
                }),
            }
        }

        let instruction = if p.instruction.trim().is_empty() {
            task.text.clone()
        } else {
            p.instruction.clone()
        };
        agents.push(RoutedAgent {
            name: profile.name.clone(),
            instruction,
            tools: planned,
            depends_on: p.depends_on.clone(),
        });
    }

    // 2. 依赖只保留指向其他已保留 agent 的项
    let kept: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
    for agent in agents.iter_mut() {
        let mut deps: Vec<String> = Vec::new();
        for d in &agent.depends_on {
            match kept.iter().find(|k| k.eq_ignore_ascii_case(d.trim())) {
                Some(k) if *k != agent.name && !deps.contains(k) => deps.push(k.clone()),
                Some(_) => {}
                None => debug!(agent = %agent.name, dependency = %d, "Dropping dangling dependency"),
            }
        }
        agent.depends_on = deps;
    }

    // 3. 策略
    let mut strategy = match Strategy::parse(&proposal.strategy) {
        Some(s) => s,
        None => {
            warnings.push(EdgeCaseWarning::InvalidStrategy {
                value: proposal.strategy.clone(),
            });
            Strategy::Sequential
        }
    };

    if agents.is_empty() {
        let fallback = roster.default_agent().to_string();
        warnings.push(EdgeCaseWarning::EmptyAgentList {
            fallback: fallback.clone(),
        });
        agents.push(RoutedAgent {
            name: fallback,
            instruction: task.text.clone(),
            tools: vec![],
            depends_on: vec![],
        });
    }

    if agents.len() == 1 {
        strategy = Strategy::Delegated;
        agents[0].depends_on.clear();
    } else if strategy == Strategy::Delegated {
        warnings.push(EdgeCaseWarning::DelegatedWithMultipleAgents {
            count: agents.len(),
        });
        strategy = Strategy::Sequential;
    }

    let mut decision = RoutingDecision {
        agents,
        strategy,
        rationale: proposal.rationale.clone(),
    };

    // 4. 并行与数据依赖：有依赖的 agent 拿不到上游输出，退回顺序执行
    if decision.strategy == Strategy::Parallel && decision.has_dependencies() {
        let dependents = decision
            .agents
            .iter()
            .filter(|a| !a.depends_on.is_empty())
            .map(|a| a.name.clone())
            .collect();
        warnings.push(EdgeCaseWarning::ParallelWithDependencies { dependents });
        decision.strategy = Strategy::Sequential;
    }

    // 5. 自动并行：顺序策略 + 足够多的 agent，且 agent 与分析步骤都互不依赖
    if decision.strategy == Strategy::Sequential
        && decision.agents.len() >= auto_parallel_min_agents
        && !decision.has_dependencies()
        && !analysis.has_step_dependencies()
    {
        warnings.push(EdgeCaseWarning::AutoParallelized {
            agents: decision.agents.len(),
        });
        decision.strategy = Strategy::Parallel;
    }

    // 6. 能力覆盖与需求冲突（只告警）
    for cap in &analysis.capabilities {
        let covered = decision.agents.iter().any(|a| {
            roster
                .resolve(&a.name)
                .is_some_and(|p| p.has_capability(cap))
        });
        if !covered {
            warnings.push(EdgeCaseWarning::UncoveredCapability {
                capability: cap.clone(),
            });
        }
        if tools.tools_for_capability(cap).is_empty() {
            warnings.push(EdgeCaseWarning::NoToolsForCapability {
                capability: cap.clone(),
            });
        }
    }
    if analysis.needs_web_search != analysis.requires("web_search") {
        warnings.push(EdgeCaseWarning::ConflictingRequirements {
            detail: format!(
                "needs_web_search is {} but web_search capability is {}",
                analysis.needs_web_search,
                if analysis.requires("web_search") { "listed" } else { "missing" }
            ),
        });
    }

    (decision, warnings)
}
