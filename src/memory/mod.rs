//! 记忆层：短期滚动窗口与本地持久化（长期记忆由外部大脑服务负责）

pub mod conversation;
pub mod persistence;

pub use conversation::{ConversationMemory, Message, Role};
pub use persistence::ConversationPersistence;
