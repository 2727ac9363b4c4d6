//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 若预置了回复脚本则按顺序返回（用完后重复最后一条）；否则回显最后一条 User 消息。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// 流式输出时每段字符数
const CHUNK_CHARS: usize = 8;

/// Mock 客户端：脚本回复或回显
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Vec<String>,
    cursor: AtomicUsize,
    last_user: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies,
            ..Self::default()
        }
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// 最近一次请求里的最后一条 User 消息
    pub fn last_user_message(&self) -> Option<String> {
        self.last_user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let n = self.cursor.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());
        *self.last_user.lock().unwrap_or_else(|e| e.into_inner()) = last_user.clone();

        if let Some(last) = self.replies.last() {
            return Ok(self.replies.get(n).unwrap_or(last).clone());
        }
        Ok(format!(
            "Echo from Mock: {}",
            last_user.as_deref().unwrap_or("(no input)")
        ))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        let chars: Vec<char> = content.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
