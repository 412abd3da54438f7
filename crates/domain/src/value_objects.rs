//! 值对象定义

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 用户ID
///
/// 由上游会话服务分配的不透明字符串，核心不解析其内部结构。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 只允许字母数字开头和结尾，中间可以出现 `_` 和 `-`
    pub fn is_well_formed(&self) -> bool {
        let bytes = self.0.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                first.is_ascii_alphanumeric()
                    && last.is_ascii_alphanumeric()
                    && bytes
                        .iter()
                        .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
            }
            _ => false,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 连接ID
///
/// 注册表以连接实例为键，同一用户可以同时持有多个连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_shape_check() {
        assert!(UserId::from("u1").is_well_formed());
        assert!(UserId::from("65f0a1b2c3d4e5f6a7b8c9d0").is_well_formed());
        assert!(UserId::from("a_b-c").is_well_formed());
        assert!(!UserId::from("").is_well_formed());
        assert!(!UserId::from("-abc").is_well_formed());
        assert!(!UserId::from("abc_").is_well_formed());
        assert!(!UserId::from("a b").is_well_formed());
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
