//! 基础设施层实现。
//!
//! 提供在线状态与消息存储的 Redis / PostgreSQL 适配器，实现应用层定义的协作者接口。

pub mod builder;
pub mod migrations;
pub mod presence_storage;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use presence_storage::RedisPresenceStore;
pub use repository::{create_pg_pool, PgMessageStore};
