//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 非法的连接状态迁移
    #[error("非法的连接状态迁移: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: crate::ConnectionState,
        to: crate::ConnectionState,
    },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 帧编解码错误
///
/// 任何一种都只会终止出错的那条连接。
#[derive(Error, Debug)]
pub enum FrameError {
    /// 帧不是合法的 `{eventName, eventPayload}` JSON 对象
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// 事件名已知，但载荷与该事件的结构不符
    #[error("payload does not match event `{event}`: {source}")]
    PayloadMismatch {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// 帧超过允许的最大字节数
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// 出站事件序列化失败
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
