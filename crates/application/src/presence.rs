use async_trait::async_trait;
use domain::{UserId, UserSummary};

use crate::error::StoreError;

/// 在线状态存储
///
/// 由事件处理器调用，核心不假设具体的存储技术。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 按用户ID查询用户摘要，未知用户返回 `None`
    async fn lookup_by_id(&self, user_id: &UserId) -> Result<Option<UserSummary>, StoreError>;

    /// 设置用户在线标记
    async fn set_online(&self, user_id: &UserId, online: bool) -> Result<(), StoreError>;

    /// 除 `except` 之外所有在线用户
    async fn online_users(&self, except: &UserId) -> Result<Vec<UserSummary>, StoreError>;
}

/// 内存实现的在线状态存储（用于测试和未配置 Redis 的部署）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        users: RwLock<HashMap<UserId, UserSummary>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// 写入或覆盖一个用户，相当于上游登录服务完成了登录
        pub async fn upsert(&self, user: UserSummary) {
            let mut users = self.users.write().await;
            users.insert(user.user_id.clone(), user);
        }

        pub async fn with_users(users: impl IntoIterator<Item = UserSummary>) -> Self {
            let store = Self::new();
            for user in users {
                store.upsert(user).await;
            }
            store
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn lookup_by_id(&self, user_id: &UserId) -> Result<Option<UserSummary>, StoreError> {
            let users = self.users.read().await;
            Ok(users.get(user_id).cloned())
        }

        async fn set_online(&self, user_id: &UserId, online: bool) -> Result<(), StoreError> {
            let mut users = self.users.write().await;
            if let Some(user) = users.get_mut(user_id) {
                user.online = online;
            }
            Ok(())
        }

        async fn online_users(&self, except: &UserId) -> Result<Vec<UserSummary>, StoreError> {
            let users = self.users.read().await;
            let mut online: Vec<UserSummary> = users
                .values()
                .filter(|user| user.online && &user.user_id != except)
                .cloned()
                .collect();
            online.sort_by(|a, b| a.username.cmp(&b.username));
            Ok(online)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn roster_excludes_requester_and_offline_users() {
            let store = MemoryPresenceStore::with_users([
                UserSummary::new("u1", "alice", true),
                UserSummary::new("u2", "bob", true),
                UserSummary::new("u3", "carol", false),
            ])
            .await;

            let roster = store.online_users(&UserId::from("u1")).await.unwrap();
            assert_eq!(roster, vec![UserSummary::new("u2", "bob", true)]);
        }

        #[tokio::test]
        async fn set_online_flips_flag_and_ignores_unknown_users() {
            let store = MemoryPresenceStore::with_users([UserSummary::new("u1", "alice", true)]).await;

            store.set_online(&UserId::from("u1"), false).await.unwrap();
            store.set_online(&UserId::from("ghost"), true).await.unwrap();

            let user = store.lookup_by_id(&UserId::from("u1")).await.unwrap().unwrap();
            assert!(!user.online);
            assert!(store.lookup_by_id(&UserId::from("ghost")).await.unwrap().is_none());
        }
    }
}
