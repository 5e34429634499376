//! 短期记忆：滚动消息窗口
//!
//! 保留最近 N 条消息（默认 20），超出时从最旧的一端剪枝（FIFO），是 UI 展示与本地持久化的唯一来源。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息（持久化格式即 `{role, content}`）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
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

/// 有界滚动窗口：长度永不超过 max_messages，剪枝时保留最新部分
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    /// 用已有消息初始化（如从磁盘加载），超出上限的旧消息直接丢弃
    pub fn with_messages(max_messages: usize, messages: Vec<Message>) -> Self {
        let mut memory = Self {
            messages,
            max_messages,
        };
        memory.prune();
        memory
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出 max_messages 时丢弃最旧的消息
    fn prune(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_most_recent_in_order() {
        let cap = 20;
        let mut memory = ConversationMemory::new(cap);
        for n in [1usize, 19, 20, 21, 45] {
            memory.clear();
            for i in 0..n {
                memory.push(Message::user(format!("m{}", i)));
            }
            assert!(memory.len() <= cap);
            let expected: Vec<String> = (n.saturating_sub(cap)..n).map(|i| format!("m{}", i)).collect();
            let actual: Vec<String> = memory.messages().iter().map(|m| m.content.clone()).collect();
            assert_eq!(actual, expected, "n = {}", n);
        }
    }

    #[test]
    fn test_with_messages_truncates() {
        let msgs: Vec<Message> = (0..5).map(|i| Message::assistant(i.to_string())).collect();
        let memory = ConversationMemory::with_messages(3, msgs);
        let contents: Vec<&str> = memory.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
