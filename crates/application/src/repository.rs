use async_trait::async_trait;
use domain::{ChatMessage, NewMessage, UserId};

use crate::error::StoreError;

/// 会话历史每页条数
pub const CONVERSATION_PAGE_SIZE: usize = 20;

/// 消息存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加一条消息
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;

    /// 两个用户之间的会话历史（任一方向）
    ///
    /// 第 1 页是最新的一页，页内按时间从旧到新排列。
    async fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: u32,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// 内存实现的消息存储
pub mod memory {
    use super::*;
    use chrono::Utc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMessageStore {
        messages: RwLock<Vec<ChatMessage>>,
    }

    impl MemoryMessageStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn len(&self) -> usize {
            self.messages.read().await.len()
        }

        pub async fn all(&self) -> Vec<ChatMessage> {
            self.messages.read().await.clone()
        }
    }

    #[async_trait]
    impl MessageStore for MemoryMessageStore {
        async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
            let stored = ChatMessage::from_new(message, Utc::now());
            self.messages.write().await.push(stored.clone());
            Ok(stored)
        }

        async fn conversation(
            &self,
            a: &UserId,
            b: &UserId,
            page: u32,
        ) -> Result<Vec<ChatMessage>, StoreError> {
            let skip = (page.max(1) as usize - 1) * CONVERSATION_PAGE_SIZE;
            let messages = self.messages.read().await;

            // 插入顺序即时间顺序，倒序取页后再翻转回从旧到新
            let mut window: Vec<ChatMessage> = messages
                .iter()
                .rev()
                .filter(|message| message.is_between(a, b))
                .skip(skip)
                .take(CONVERSATION_PAGE_SIZE)
                .cloned()
                .collect();
            window.reverse();
            Ok(window)
        }
    }

}
