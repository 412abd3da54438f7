use domain::{DomainError, FrameError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
}

/// 外部协作者（在线状态存储、消息存储）返回的错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid stored data: {0}")]
    Corrupted(String),
}

impl StoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// Hub 控制循环已退出，只会在进程关闭时出现
    #[error("hub control loop has stopped")]
    Closed,
}
