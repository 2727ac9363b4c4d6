//! 会话级分析缓存
//!
//! 键为规范化任务文本；同一个键的并发未命中共享一次初始化（single-flight）。
//! 容量满时淘汰最早插入的键；初始化失败的结果不会留在缓存里。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::pipeline::AnalysisResult;

type Cell = Arc<OnceCell<AnalysisResult>>;

#[derive(Debug, Default)]
struct CacheInner {
    cells: HashMap<String, Cell>,
    order: VecDeque<String>,
}

/// 命中统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct AnalysisCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn cell(&self, key: &str) -> Cell {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cell) = inner.cells.get(key) {
            return cell.clone();
        }
        let cell: Cell = Arc::new(OnceCell::new());
        inner.cells.insert(key.to_string(), cell.clone());
        inner.order.push_back(key.to_string());
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.cells.remove(&oldest);
                tracing::debug!(key = %oldest, "Analysis cache evicted entry");
            }
        }
        cell
    }

    fn forget_if_empty(&self, key: &str, cell: &Cell) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stale = inner
            .cells
            .get(key)
            .is_some_and(|c| Arc::ptr_eq(c, cell) && !c.initialized());
        if stale {
            inner.cells.remove(key);
            inner.order.retain(|k| k != key);
        }
    }

    /// 取缓存值；未命中时执行 init。返回 (结果, 是否命中)
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &str, init: F) -> Result<(AnalysisResult, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisResult, E>>,
    {
        let cell = self.cell(key);
        if let Some(v) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((v.clone(), true));
        }

        let mut ran = false;
        let result = cell
            .get_or_try_init(|| {
                ran = true;
                init()
            })
            .await
            .cloned();

        match result {
            Ok(v) => {
                if ran {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok((v, !ran))
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.forget_if_empty(key, &cell);
                Err(e)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<AnalysisResult> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cells.get(key).and_then(|c| c.get().cloned())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cells.values().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
