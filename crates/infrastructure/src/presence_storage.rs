use std::collections::HashMap;
use std::sync::Arc;

use application::{PresenceStore, StoreError};
use async_trait::async_trait;
use domain::{UserId, UserSummary};
use redis::AsyncCommands;

/// 在线用户集合
const ONLINE_SET_KEY: &str = "users:online";

fn user_key(user_id: &UserId) -> String {
    format!("user:{}", user_id)
}

fn map_redis_err(err: redis::RedisError) -> StoreError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::unavailable(format!("Redis unavailable: {err}"))
    } else {
        StoreError::storage(format!("Redis command failed: {err}"))
    }
}

/// 把 `user:{id}` 哈希还原成用户摘要，空哈希表示用户不存在
fn summary_from_fields(
    user_id: &UserId,
    fields: &HashMap<String, String>,
) -> Result<Option<UserSummary>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let username = fields
        .get("username")
        .ok_or_else(|| StoreError::Corrupted(format!("{} has no username", user_key(user_id))))?;
    let online = matches!(
        fields.get("online").map(String::as_str),
        Some("true") | Some("1")
    );

    Ok(Some(UserSummary::new(user_id.clone(), username.as_str(), online)))
}

/// Redis在线状态存储
///
/// 每个用户保存为哈希 `user:{id}`（字段 `username`、`online`），
/// 在线用户ID另存于集合 `users:online`，便于列出名单。
#[derive(Clone)]
pub struct RedisPresenceStore {
    redis_client: Arc<redis::Client>,
}

impl RedisPresenceStore {
    pub fn new(redis_client: Arc<redis::Client>) -> Self {
        Self { redis_client }
    }

    pub fn open(url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self::new(Arc::new(redis::Client::open(url)?)))
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Redis connection failed");
                map_redis_err(e)
            })
    }

    /// 写入或覆盖一个用户，供初始化与测试使用
    pub async fn upsert(&self, user: &UserSummary) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = user_key(&user.user_id);
        let online = if user.online { "true" } else { "false" };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, "username", &user.username)
            .hset(&key, "online", online);
        if user.online {
            pipe.sadd(ONLINE_SET_KEY, user.user_id.as_str());
        } else {
            pipe.srem(ONLINE_SET_KEY, user.user_id.as_str());
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn lookup_by_id(&self, user_id: &UserId) -> Result<Option<UserSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(user_key(user_id))
            .await
            .map_err(map_redis_err)?;

        summary_from_fields(user_id, &fields)
    }

    async fn set_online(&self, user_id: &UserId, online: bool) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = user_key(user_id);

        // 未知用户不创建记录
        let exists: bool = conn.exists(&key).await.map_err(map_redis_err)?;
        if !exists {
            tracing::debug!(user_id = %user_id, "忽略未知用户的在线状态更新");
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, "online", if online { "true" } else { "false" });
        if online {
            pipe.sadd(ONLINE_SET_KEY, user_id.as_str());
        } else {
            pipe.srem(ONLINE_SET_KEY, user_id.as_str());
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn online_users(&self, except: &UserId) -> Result<Vec<UserSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.smembers(ONLINE_SET_KEY).await.map_err(map_redis_err)?;

        let ids: Vec<UserId> = members
            .into_iter()
            .map(UserId::from)
            .filter(|id| id != except)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(user_key(id));
        }
        let rows: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(map_redis_err)?;

        let mut roster = Vec::with_capacity(ids.len());
        for (id, fields) in ids.iter().zip(rows.iter()) {
            match summary_from_fields(id, fields) {
                Ok(Some(user)) if user.online => roster.push(user),
                Ok(_) => {}
                Err(err) => tracing::warn!(user_id = %id, error = %err, "跳过损坏的用户记录"),
            }
        }
        roster.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(roster)
    }
}
