//! AgentExecutor 抽象：运行一个 agent 处理一份分配，可在返回最终结果前流式推送片段

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::ExecutorError;
use crate::pipeline::{AgentAssignment, EventSink, SupervisorEvent};

/// 单个 agent 的流式片段出口（转为 agent_delta 事件）
#[derive(Debug, Clone)]
pub struct DeltaSink {
    events: EventSink,
    agent: String,
    index: usize,
}

impl DeltaSink {
    pub fn new(events: EventSink, agent: impl Into<String>, index: usize) -> Self {
        Self {
            events,
            agent: agent.into(),
            index,
        }
    }

    pub fn disabled() -> Self {
        Self::new(EventSink::disabled(), "", 0)
    }

    pub fn send(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.events.emit(SupervisorEvent::AgentDelta {
            agent: self.agent.clone(),
            index: self.index,
            text: text.to_string(),
        });
    }
}

/// 外部 agent 执行器；实现方需在 cancel 触发后尽快返回 ExecutorError::Cancelled
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(
        &self,
        assignment: &AgentAssignment,
        cancel: CancellationToken,
        deltas: DeltaSink,
    ) -> Result<String, ExecutorError>;
}
