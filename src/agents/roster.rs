//! 团队名单与工具目录
//!
//! Router 依据名单校验 agent 名（忽略大小写）与工具名；工具在这里只是元数据，真正执行由 agent 自己负责。

use serde::Serialize;

use crate::config::AgentsSection;

/// 单个专家 agent 的描述
#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub system_prompt: String,
}

impl AgentProfile {
    pub fn new(name: &str, description: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            system_prompt: format!("You are {name}, a specialist agent. {description}"),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

/// 团队名单 + 兜底 agent
#[derive(Debug, Clone)]
pub struct AgentRoster {
    agents: Vec<AgentProfile>,
    default_agent: String,
}

impl AgentRoster {
    pub fn new(agents: Vec<AgentProfile>, default_agent: impl Into<String>) -> Self {
        Self {
            agents,
            default_agent: default_agent.into(),
        }
    }

    /// 内置名单：Researcher / Analyst / Coder / Writer / Generalist
    pub fn builtin() -> Self {
        Self::new(
            vec![
                AgentProfile::new(
                    "Researcher",
                    "Finds current facts on the web and cites sources.",
                    &["web_search", "research"],
                ),
                AgentProfile::new(
                    "Analyst",
                    "Performs calculations and quantitative analysis.",
                    &["computation", "analysis"],
                ),
                AgentProfile::new(
                    "Coder",
                    "Writes, reviews and debugs code.",
                    &["code"],
                ),
                AgentProfile::new(
                    "Writer",
                    "Drafts, edits and summarizes prose.",
                    &["writing", "summarization"],
                ),
                AgentProfile::new(
                    "Generalist",
                    "Answers general questions directly.",
                    &["general"],
                ),
            ],
            "Generalist",
        )
    }

    /// 配置里名单为空则使用内置名单
    pub fn from_config(section: &AgentsSection) -> Self {
        if section.roster.is_empty() {
            let mut roster = Self::builtin();
            roster.default_agent = section.default_agent.clone();
            return roster;
        }
        let agents = section
            .roster
            .iter()
            .map(|e| {
                let caps: Vec<&str> = e.capabilities.iter().map(String::as_str).collect();
                let mut profile = AgentProfile::new(&e.name, &e.description, &caps);
                if let Some(prompt) = &e.system_prompt {
                    profile.system_prompt = prompt.clone();
                }
                profile
            })
            .collect();
        Self::new(agents, section.default_agent.clone())
    }

    pub fn agents(&self) -> &[AgentProfile] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// 忽略大小写与首尾空白查找
    pub fn resolve(&self, name: &str) -> Option<&AgentProfile> {
        let name = name.trim();
        self.agents
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// 第一个具备该能力的 agent
    pub fn find_by_capability(&self, capability: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.has_capability(capability))
    }
}

/// 工具元数据
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ToolSpec::new(
                "web_search",
                "Search the web for current information",
                &["web_search", "research"],
            ),
            ToolSpec::new(
                "calculator",
                "Evaluate arithmetic expressions",
                &["computation", "analysis"],
            ),
            ToolSpec::new(
                "code_interpreter",
                "Run code snippets in a sandbox",
                &["code", "computation"],
            ),
            ToolSpec::new(
                "text_editor",
                "Draft and revise documents",
                &["writing", "summarization"],
            ),
        ])
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolSpec> {
        let name = name.trim();
        self.tools.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tools_for_capability(&self, capability: &str) -> Vec<&ToolSpec> {
        self.tools
            .iter()
            .filter(|t| t.capabilities.iter().any(|c| c.eq_ignore_ascii_case(capability)))
            .collect()
    }
}
