//! Agent 调用调度：用 Semaphore 限制同时在跑的 agent 调用数（max_parallel_agents）

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::SupervisorError;

/// agent 并发许可；克隆后共享同一个 Semaphore
#[derive(Debug, Clone)]
pub struct AgentScheduler {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AgentScheduler {
    pub fn new(max_parallel_agents: usize) -> Self {
        let capacity = max_parallel_agents.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取一次 agent 调用的许可；Semaphore 已关闭视为取消
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SupervisorError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SupervisorError::Cancelled)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 关闭后所有等待中的 acquire 立即返回 Cancelled
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for AgentScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_bounded() {
        let s = AgentScheduler::new(2);
        let a = s.acquire().await.unwrap();
        let _b = s.acquire().await.unwrap();
        assert_eq!(s.available(), 0);
        drop(a);
        assert_eq!(s.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_is_cancelled() {
        let s = AgentScheduler::new(1);
        s.close();
        assert_eq!(s.acquire().await.unwrap_err(), SupervisorError::Cancelled);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(AgentScheduler::new(0).capacity(), 1);
    }
}
