//! 运行事件：阶段迁移、agent 生命周期与流式片段
//!
//! 本模块只产出可序列化的值；传输（SSE / WebSocket / stdout）由调用方决定。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::{ErrorKind, Phase};

/// 单个事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    PhaseStart {
        phase: Phase,
        attempt: u32,
    },
    PhaseEnd {
        phase: Phase,
        elapsed_ms: u64,
        ok: bool,
    },
    AgentStart {
        agent: String,
        index: usize,
        attempt: u32,
    },
    AgentComplete {
        agent: String,
        index: usize,
        success: bool,
        elapsed_ms: u64,
        attempts: u32,
    },
    /// agent 流式输出的一小段
    AgentDelta {
        agent: String,
        index: usize,
        text: String,
    },
    SlowPhaseWarning {
        phase: Phase,
        elapsed_ms: u64,
        threshold_ms: u64,
    },
    RefinementRoundStarted {
        round: usize,
        previous_score: f64,
    },
    Error {
        kind: ErrorKind,
        phase: Phase,
        message: String,
    },
}

/// 带运行 id 与序号的事件（序号在一次运行内单调递增）
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub run_id: String,
    pub seq: u64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: SupervisorEvent,
}

/// 事件发送端；可克隆给并行 agent 任务，未订阅时所有发送都是空操作
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
    run_id: Arc<str>,
    seq: Arc<Mutex<u64>>,
}

impl EventSink {
    pub fn new(tx: Option<mpsc::UnboundedSender<RunEvent>>, run_id: &str) -> Self {
        Self {
            tx,
            run_id: Arc::from(run_id),
            seq: Arc::new(Mutex::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 序号分配与发送在同一把锁内完成，接收端看到的顺序即序号顺序
    pub fn emit(&self, event: SupervisorEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        let ev = RunEvent {
            run_id: self.run_id.to_string(),
            seq: *seq,
            timestamp: chrono::Utc::now().timestamp_millis(),
            event,
        };
        if tx.send(ev).is_ok() {
            *seq += 1;
        }
    }
}
