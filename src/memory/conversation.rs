//! 对话消息：任务携带的先前上下文，以及发往 LLM 的消息
//!
//! Task 的 context 只是一串带角色的消息；render_transcript 取最近 N 条拼成纯文本，供 oracle / agent prompt 引用。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 取最近 max_messages 条（system 消息不计入）拼成 `role: content` 形式的纯文本
pub fn render_transcript(messages: &[Message], max_messages: usize) -> String {
    let visible: Vec<&Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let skip = visible.len().saturating_sub(max_messages);
    visible
        .into_iter()
        .skip(skip)
        .map(|m| format!("{}: {}", m.role, m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_transcript_keeps_recent() {
        let messages = vec![
            Message::system("ignored"),
            Message::user("first"),
            Message::assistant("second"),
            Message::user("third"),
        ];
        let text = render_transcript(&messages, 2);
        assert_eq!(text, "assistant: second\nuser: third");
    }

    #[test]
    fn test_render_transcript_empty() {
        assert!(render_transcript(&[], 5).is_empty());
    }
}
