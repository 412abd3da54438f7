//! 用户摘要
//!
//! 在线名单和上下线通知里传输的用户视图，来自在线状态存储。

use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub online: bool,
}

impl UserSummary {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, online: bool) -> Self {
        Self {
            username: username.into(),
            user_id: user_id.into(),
            online,
        }
    }

    /// 复制一份标记为离线的摘要，用于断开通知
    pub fn offline(&self) -> Self {
        Self {
            online: false,
            ..self.clone()
        }
    }
}
