//! 私聊消息实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DomainError, DomainResult, UserId};

/// 待写入消息存储的新消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(rename = "fromUserID")]
    pub from_user_id: UserId,
    #[serde(rename = "toUserID")]
    pub to_user_id: UserId,
    pub message: String,
}

impl NewMessage {
    pub fn new(
        from_user_id: impl Into<UserId>,
        to_user_id: impl Into<UserId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            message: message.into(),
        }
    }

    /// 文本、发送者、接收者都必须非空
    pub fn validate(&self) -> DomainResult<()> {
        if self.message.is_empty() {
            return Err(DomainError::validation_error("message", "must not be empty"));
        }
        if self.from_user_id.is_empty() {
            return Err(DomainError::validation_error("fromUserID", "must not be empty"));
        }
        if self.to_user_id.is_empty() {
            return Err(DomainError::validation_error("toUserID", "must not be empty"));
        }
        Ok(())
    }
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    #[serde(rename = "fromUserID")]
    pub from_user_id: UserId,
    #[serde(rename = "toUserID")]
    pub to_user_id: UserId,
    pub message: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_new(message: NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_user_id: message.from_user_id,
            to_user_id: message.to_user_id,
            message: message.message,
            created_at,
        }
    }

    /// 消息是否属于两个用户之间的会话（任一方向）
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.from_user_id == a && &self.to_user_id == b)
            || (&self.from_user_id == b && &self.to_user_id == a)
    }
}
