use application::{MessageStore, StoreError, CONVERSATION_PAGE_SIZE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ChatMessage, NewMessage, UserId};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::unavailable(err.to_string())
        }
        other => StoreError::storage(other.to_string()),
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    from_user_id: String,
    to_user_id: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRecord> for ChatMessage {
    fn from(value: MessageRecord) -> Self {
        ChatMessage {
            id: value.id,
            from_user_id: UserId::from(value.from_user_id),
            to_user_id: UserId::from(value.to_user_id),
            message: value.message,
            created_at: value.created_at,
        }
    }
}

/// PostgreSQL消息存储
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 检查数据库连接是否正常
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let record = ChatMessage::from_new(message, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO messages (id, from_user_id, to_user_id, message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.from_user_id.as_str())
        .bind(record.to_user_id.as_str())
        .bind(&record.message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record)
    }

    async fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let offset = i64::from(page.max(1) - 1) * CONVERSATION_PAGE_SIZE as i64;

        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, from_user_id, to_user_id, message, created_at
            FROM messages
            WHERE (from_user_id = $1 AND to_user_id = $2)
               OR (from_user_id = $2 AND to_user_id = $1)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(CONVERSATION_PAGE_SIZE as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 按最新优先取出一页，再翻转成从旧到新
        Ok(records.into_iter().rev().map(ChatMessage::from).collect())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
