//! 应用层实现。
//!
//! 这里提供连接 Hub（在线连接注册表与扇出）、入站事件分发器，
//! 以及对外部协作者（在线状态存储、消息存储）的抽象。

pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod presence;
pub mod repository;

pub use dispatcher::EventDispatcher;
pub use error::{ApplicationError, HubError, StoreError};
pub use hub::{ConnectionHandle, ConnectionSummary, Hub, Outbound, WeakHub};
pub use presence::{memory::MemoryPresenceStore, PresenceStore};
pub use repository::{memory::MemoryMessageStore, MessageStore, CONVERSATION_PAGE_SIZE};
