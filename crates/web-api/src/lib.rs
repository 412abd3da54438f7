//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级交给连接的收发泵，HTTP 查询委托给应用层的协作者。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
