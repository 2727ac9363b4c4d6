//! 基于 LlmClient 的 AgentExecutor
//!
//! system prompt = 名单中的 agent 提示 + 可用工具；user = 分配指令（含精炼反馈）。
//! 逐段消费流式输出并推送到 DeltaSink；取消令牌触发时立即放弃。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentExecutor, AgentRoster, DeltaSink};
use crate::core::ExecutorError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::pipeline::AgentAssignment;

pub struct LlmAgentExecutor {
    llm: Arc<dyn LlmClient>,
    roster: Arc<AgentRoster>,
}

impl LlmAgentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, roster: Arc<AgentRoster>) -> Self {
        Self { llm, roster }
    }

    fn build_messages(&self, assignment: &AgentAssignment) -> Result<Vec<Message>, ExecutorError> {
        let profile = self
            .roster
            .resolve(&assignment.agent)
            .ok_or_else(|| ExecutorError::UnknownAgent(assignment.agent.clone()))?;

        let mut system = profile.system_prompt.clone();
        if !assignment.tools.is_empty() {
            system.push_str(&format!(
                "\n\nTools planned for this step: {}.",
                assignment.tools.join(", ")
            ));
        }
        system.push_str("\nAnswer with the result only.");

        Ok(vec![
            Message::system(system),
            Message::user(assignment.render_instruction()),
        ])
    }
}

#[async_trait]
impl AgentExecutor for LlmAgentExecutor {
    async fn run(
        &self,
        assignment: &AgentAssignment,
        cancel: CancellationToken,
        deltas: DeltaSink,
    ) -> Result<String, ExecutorError> {
        let messages = self.build_messages(assignment)?;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            s = self.llm.complete_stream(&messages) => s?,
        };

        let mut output = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        deltas.send(&text);
                        output.push_str(&text);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        if output.trim().is_empty() {
            return Err(ExecutorError::Failed(format!(
                "{} returned an empty answer",
                assignment.agent
            )));
        }
        Ok(output)
    }
}
