//! 连接生命周期状态机
//!
//! `Connecting → Active → Closed`，`Closed` 为终态，连接实例不会复活。

use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// 传输已升级，尚未在 Hub 注册
    Connecting,
    /// 已注册，收发两个泵正在运行
    Active,
    /// 已拆除
    Closed,
}

impl ConnectionState {
    /// 校验并返回迁移后的状态
    pub fn transition(self, next: ConnectionState) -> DomainResult<ConnectionState> {
        use ConnectionState::*;
        match (self, next) {
            (Connecting, Active) | (Connecting, Closed) | (Active, Closed) => Ok(next),
            (from, to) => Err(DomainError::InvalidStateTransition { from, to }),
        }
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}
