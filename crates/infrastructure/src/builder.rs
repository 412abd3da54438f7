use std::sync::Arc;

use application::{MemoryMessageStore, MemoryPresenceStore, MessageStore, PresenceStore};
use config::AppConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    presence_storage::RedisPresenceStore,
    repository::{create_pg_pool, PgMessageStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 按配置装配好的外部协作者
#[derive(Clone)]
pub struct Infrastructure {
    pub presence: Arc<dyn PresenceStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Infrastructure {
    /// 配置了 url 的协作者连接真实后端，其余退回内存实现
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let messages: Arc<dyn MessageStore> = match &config.database.url {
            Some(url) => {
                let pool = create_pg_pool(url, config.database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("消息存储使用 PostgreSQL");
                Arc::new(PgMessageStore::new(pool))
            }
            None => {
                tracing::warn!("未配置数据库，消息只保存在内存中");
                Arc::new(MemoryMessageStore::new())
            }
        };

        let presence: Arc<dyn PresenceStore> = match &config.redis.url {
            Some(url) => {
                tracing::info!("在线状态存储使用 Redis");
                Arc::new(RedisPresenceStore::open(url)?)
            }
            None => {
                tracing::warn!("未配置 Redis，在线状态只保存在内存中");
                Arc::new(MemoryPresenceStore::new())
            }
        };

        Ok(Self { presence, messages })
    }

    pub fn in_memory() -> Self {
        Self {
            presence: Arc::new(MemoryPresenceStore::new()),
            messages: Arc::new(MemoryMessageStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{NewMessage, UserId};

    #[tokio::test]
    async fn falls_back_to_memory_stores_without_urls() {
        let infra = Infrastructure::connect(&AppConfig::default()).await.unwrap();

        infra
            .messages
            .append(NewMessage::new("u1", "u2", "hi"))
            .await
            .unwrap();
        let page = infra
            .messages
            .conversation(&UserId::from("u1"), &UserId::from("u2"), 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert!(infra
            .presence
            .lookup_by_id(&UserId::from("u1"))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn invalid_redis_url_is_rejected() {
        assert!(RedisPresenceStore::open("not-a-url").is_err());
    }
}
