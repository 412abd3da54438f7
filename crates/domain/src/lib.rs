//! 聊天系统核心领域模型
//!
//! 包含用户摘要、聊天消息、连接生命周期等实体，以及在线路上传输的事件与帧编解码。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
