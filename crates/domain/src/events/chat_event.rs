//! 聊天事件定义
//!
//! 每个事件都是一个带标签的值对象：`{ "eventName": ..., "eventPayload": ... }`。
//! 解码之后不会再被修改。

use serde::{Deserialize, Serialize};

use crate::{NewMessage, UserId, UserSummary};

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "eventPayload")]
pub enum ClientEvent {
    /// 用户上线，载荷为用户ID
    #[serde(rename = "join")]
    Join(UserId),
    /// 用户离线，线上名称为 `disconnect`
    #[serde(rename = "disconnect")]
    Leave(UserId),
    /// 私聊消息
    #[serde(rename = "message")]
    Message(NewMessage),
}

impl ClientEvent {
    pub const JOIN: &'static str = "join";
    pub const DISCONNECT: &'static str = "disconnect";
    pub const MESSAGE: &'static str = "message";

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => Self::JOIN,
            ClientEvent::Leave(_) => Self::DISCONNECT,
            ClientEvent::Message(_) => Self::MESSAGE,
        }
    }
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "eventPayload")]
pub enum ServerEvent {
    #[serde(rename = "chatlist-response")]
    ChatlistResponse(ChatlistResponse),
    #[serde(rename = "message-response")]
    MessageResponse(NewMessage),
}

impl ServerEvent {
    /// 通知其他人有新用户上线
    pub fn new_user_joined(user: UserSummary) -> Self {
        Self::ChatlistResponse(ChatlistResponse {
            kind: ChatlistKind::NewUserJoined,
            chatlist: Chatlist::User(user),
        })
    }

    /// 推送给刚加入的连接的完整在线名单
    pub fn my_chatlist(roster: Vec<UserSummary>) -> Self {
        Self::ChatlistResponse(ChatlistResponse {
            kind: ChatlistKind::MyChatlist,
            chatlist: Chatlist::Roster(roster),
        })
    }

    pub fn user_disconnected(user: UserSummary) -> Self {
        Self::ChatlistResponse(ChatlistResponse {
            kind: ChatlistKind::UserDisconnected,
            chatlist: Chatlist::User(user),
        })
    }

    pub fn message_response(message: NewMessage) -> Self {
        Self::MessageResponse(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatlistResponse {
    #[serde(rename = "type")]
    pub kind: ChatlistKind,
    pub chatlist: Chatlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatlistKind {
    NewUserJoined,
    MyChatlist,
    UserDisconnected,
}

/// 名单载荷：完整名单或单个用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Chatlist {
    Roster(Vec<UserSummary>),
    User(UserSummary),
}
