//! 基于 LlmClient 的 ReasoningOracle
//!
//! 每类请求一个 system prompt，内嵌期望回复的 JSON Schema；回复用 schema::parse_reply 解析。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::{AgentRoster, ToolCatalog};
use crate::core::OracleError;
use crate::llm::LlmClient;
use crate::memory::{render_transcript, Message};
use crate::oracle::schema::{parse_reply, schema_json};
use crate::oracle::ReasoningOracle;
use crate::pipeline::{
    AnalysisResult, QualityAssessment, QualityCriteria, RouteProposal, Task,
};

/// 拼进 prompt 的历史对话条数上限
const CONTEXT_MESSAGES: usize = 6;

pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn ask<T>(&self, system: String, user: String) -> Result<T, OracleError>
    where
        T: serde::de::DeserializeOwned,
    {
        let messages = vec![Message::system(system), Message::user(user)];
        let reply = self.llm.complete(&messages).await?;
        parse_reply(&reply)
    }
}

fn json_instruction<T: schemars::JsonSchema>() -> String {
    format!(
        "Reply with exactly one JSON object (optionally inside a ```json block) matching this schema:\n{}",
        schema_json::<T>()
    )
}

fn task_block(task: &Task) -> String {
    let transcript = render_transcript(&task.context, CONTEXT_MESSAGES);
    if transcript.is_empty() {
        format!("Task:\n{}", task.text)
    } else {
        format!("Conversation so far:\n{}\n\nTask:\n{}", transcript, task.text)
    }
}

#[async_trait]
impl ReasoningOracle for LlmOracle {
    async fn analyze(&self, task: &Task) -> Result<AnalysisResult, OracleError> {
        let system = format!(
            "You are the analysis stage of a multi-agent supervisor. Classify the task's complexity \
             (low, medium, high), list the capabilities it requires (e.g. web_search, computation, \
             analysis, code, summarization, writing), and decompose it into ordered steps. \
             Step dependencies refer to earlier step indices.\n\n{}",
            json_instruction::<AnalysisResult>()
        );
        let mut analysis: AnalysisResult = self.ask(system, task_block(task)).await?;
        analysis.capabilities = analysis
            .capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        analysis.degraded = false;
        Ok(analysis)
    }

    async fn route(
        &self,
        task: &Task,
        analysis: &AnalysisResult,
        roster: &AgentRoster,
        tools: &ToolCatalog,
    ) -> Result<RouteProposal, OracleError> {
        let team = roster
            .agents()
            .iter()
            .map(|a| format!("- {}: {} [{}]", a.name, a.description, a.capabilities.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let catalog = tools
            .tools()
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let analysis_json = serde_json::to_string_pretty(analysis)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let system = format!(
            "You are the routing stage of a multi-agent supervisor. Pick agents from the team, \
             write one instruction per agent, plan tools from the catalog, and choose a strategy: \
             delegated (one agent), sequential (each agent builds on the previous output) or \
             parallel (independent agents). Use depends_on for agents that need another agent's output.\n\n\
             Team:\n{}\n\nTools:\n{}\n\n{}",
            team,
            catalog,
            json_instruction::<RouteProposal>()
        );
        let user = format!("{}\n\nAnalysis:\n{}", task_block(task), analysis_json);
        self.ask(system, user).await
    }

    async fn assess_quality(
        &self,
        task: &Task,
        output: &str,
        criteria: &QualityCriteria,
    ) -> Result<QualityAssessment, OracleError> {
        let mut notes = String::new();
        if !criteria.required_capabilities.is_empty() {
            notes.push_str(&format!(
                "Required capabilities: {}\n",
                criteria.required_capabilities.join(", ")
            ));
        }
        for w in &criteria.warnings {
            notes.push_str(&format!("Routing warning: {}\n", w));
        }
        if criteria.degraded_analysis {
            notes.push_str("The task analysis was produced by a fallback heuristic; be conservative.\n");
        }

        let system = format!(
            "You are the quality gate of a multi-agent supervisor. Score how completely and \
             correctly the answer solves the task, from 0.0 to 1.0 (pass mark {:.2}). List missing \
             elements and give a short critique.\n\n{}",
            criteria.threshold,
            json_instruction::<QualityAssessment>()
        );
        let user = format!("{}\n\n{}\nAnswer:\n{}", task_block(task), notes, output);
        self.ask(system, user).await
    }
}
