//! 会话监管：会话级取消令牌 + 会话级分析缓存
//!
//! 每次运行从会话令牌派生子令牌；Ctrl+C 时取消会话令牌即可中止当前运行。
//! 分析缓存在会话内跨运行共享。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pipeline::AnalysisCache;

#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    session_id: String,
    /// 用户 Cancel 时触发
    cancel_token: CancellationToken,
    cache: Arc<AnalysisCache>,
}

impl SessionSupervisor {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            session_id: format!("session_{}", uuid::Uuid::new_v4()),
            cancel_token: CancellationToken::new(),
            cache: Arc::new(AnalysisCache::new(cache_capacity)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单次运行）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    pub fn cache(&self) -> Arc<AnalysisCache> {
        self.cache.clone()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children() {
        let s = SessionSupervisor::new(4);
        let child = s.child_token();
        assert!(!child.is_cancelled());
        s.cancel();
        assert!(s.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_clones_share_cache() {
        let s = SessionSupervisor::new(4);
        let t = s.clone();
        assert!(Arc::ptr_eq(&s.cache(), &t.cache()));
        assert_eq!(s.session_id(), t.session_id());
    }
}
