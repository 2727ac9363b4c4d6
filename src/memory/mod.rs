//! 记忆层：任务携带的对话上下文

pub mod conversation;

pub use conversation::{render_transcript, Message, Role};
