//! 可编排的 Mock AgentExecutor（测试与离线运行）
//!
//! 每个 agent 可设置：固定输出 / 按调用次序的输出、延迟、失败模式。
//! 记录每个 agent 的调用次数、收到的指令，以及同时在跑的最大调用数。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentExecutor, DeltaSink};
use crate::core::ExecutorError;
use crate::pipeline::AgentAssignment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FailureMode {
    #[default]
    Never,
    Always,
    /// 前 n 次调用失败
    FirstN(u32),
}

#[derive(Debug, Clone, Default)]
struct AgentScript {
    outputs: Vec<String>,
    latency: Duration,
    failure: FailureMode,
}

#[derive(Debug, Default)]
pub struct MockAgentExecutor {
    scripts: HashMap<String, AgentScript>,
    calls: Mutex<HashMap<String, u32>>,
    instructions: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// 离开作用域时减少在跑计数（包括被取消的调用）
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockAgentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self, agent: &str) -> &mut AgentScript {
        self.scripts.entry(agent.to_string()).or_default()
    }

    pub fn with_output(mut self, agent: &str, output: impl Into<String>) -> Self {
        self.script_mut(agent).outputs = vec![output.into()];
        self
    }

    /// 第 n 次调用返回 outputs[n]，用完后重复最后一条
    pub fn with_outputs(mut self, agent: &str, outputs: Vec<String>) -> Self {
        self.script_mut(agent).outputs = outputs;
        self
    }

    pub fn with_latency(mut self, agent: &str, latency: Duration) -> Self {
        self.script_mut(agent).latency = latency;
        self
    }

    pub fn failing(mut self, agent: &str) -> Self {
        self.script_mut(agent).failure = FailureMode::Always;
        self
    }

    pub fn failing_first(mut self, agent: &str, n: u32) -> Self {
        self.script_mut(agent).failure = FailureMode::FirstN(n);
        self
    }

    pub fn calls(&self, agent: &str) -> u32 {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(agent).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.values().sum()
    }

    /// 该 agent 收到的完整指令（按调用顺序）
    pub fn instructions_for(&self, agent: &str) -> Vec<String> {
        let log = self.instructions.lock().unwrap_or_else(|e| e.into_inner());
        log.iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, i)| i.clone())
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record_call(&self, assignment: &AgentAssignment) -> u32 {
        let n = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            let n = calls.entry(assignment.agent.clone()).or_insert(0);
            *n += 1;
            *n - 1
        };
        self.instructions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((assignment.agent.clone(), assignment.render_instruction()));
        n
    }
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
    async fn run(
        &self,
        assignment: &AgentAssignment,
        cancel: CancellationToken,
        deltas: DeltaSink,
    ) -> Result<String, ExecutorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let call = self.record_call(assignment);
        let script = self
            .scripts
            .get(&assignment.agent)
            .cloned()
            .unwrap_or_default();

        if !script.latency.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(script.latency) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let fail = match script.failure {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::FirstN(n) => call < n,
        };
        if fail {
            return Err(ExecutorError::Failed(format!(
                "{} scripted failure (call {})",
                assignment.agent,
                call + 1
            )));
        }

        let output = match script.outputs.get(call as usize).or(script.outputs.last()) {
            Some(o) => o.clone(),
            None => {
                let first_line = assignment.instruction.lines().next().unwrap_or("");
                format!("{} result for: {}", assignment.agent, first_line)
            }
        };
        deltas.send(&output);
        Ok(output)
    }
}
