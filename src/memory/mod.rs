//! 记忆层：对话消息与按用户的会话历史

pub mod conversation;
pub mod history;

pub use conversation::{Message, Role};
pub use history::{HistoryStore, InMemoryHistoryStore};
