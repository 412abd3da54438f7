//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - WebSocket 超时、帧大小与出站队列容量
//! - Hub 控制循环
//! - 外部协作者（数据库、Redis）的连接信息
//!
//! 配置来源按优先级从低到高：内置默认值、`CHAT_` 前缀的环境变量
//! （嵌套字段用 `__` 分隔，例如 `CHAT_WEBSOCKET__READ_TIMEOUT_MS=30000`）。

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// WebSocket 连接配置
    pub websocket: WebSocketConfig,
    /// Hub 配置
    pub hub: HubConfig,
    /// 消息投递配置
    pub delivery: DeliveryConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// Redis配置
    pub redis: RedisConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// 同一用户建立第二条连接时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// 多条连接并存，互不影响
    #[default]
    Coexist,
    /// 新连接注册时驱逐该用户已有的所有连接
    ReplaceExisting,
}

/// WebSocket 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// 读超时：在此时间内收不到 pong 即拆除连接
    pub read_timeout_ms: u64,
    /// 单次写操作的超时
    pub write_timeout_ms: u64,
    /// 入站帧的最大字节数
    pub max_frame_bytes: usize,
    /// 每条连接出站队列的容量，写满即视为慢消费者
    pub outbound_queue_capacity: usize,
    pub session_policy: SessionPolicy,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            max_frame_bytes: 512,
            outbound_queue_capacity: 256,
            session_policy: SessionPolicy::Coexist,
        }
    }
}

impl WebSocketConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// 心跳间隔取读超时的 9/10，保证 ping 总在对端截止时间之前到达
    pub fn heartbeat_interval(&self) -> Duration {
        self.read_timeout() * 9 / 10
    }
}

/// Hub 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// 控制循环命令队列容量
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

/// 消息投递配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// 为 true 时只有持久化成功的消息才会实时投递
    pub require_persistence: bool,
}

/// 数据库配置，未设置 url 时使用内存消息存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Redis配置，未设置 url 时使用内存在线状态存储
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

impl AppConfig {
    /// 默认值叠加 `CHAT_` 环境变量
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("CHAT_").split("__"))
    }

    /// 从环境变量加载配置并校验
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.websocket;

        if ws.read_timeout_ms == 0 {
            return Err(ConfigError::InvalidWebSocketConfig(
                "read timeout must be greater than 0".to_string(),
            ));
        }

        if ws.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidWebSocketConfig(
                "write timeout must be greater than 0".to_string(),
            ));
        }

        // 心跳必须严格早于读超时，否则空闲但健康的连接会被误杀
        let heartbeat = ws.heartbeat_interval();
        if heartbeat.is_zero() || heartbeat >= ws.read_timeout() {
            return Err(ConfigError::InvalidWebSocketConfig(format!(
                "heartbeat interval {:?} must be non-zero and below read timeout {:?}",
                heartbeat,
                ws.read_timeout()
            )));
        }

        if ws.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidWebSocketConfig(
                "max frame size must be greater than 0".to_string(),
            ));
        }

        if ws.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidWebSocketConfig(
                "outbound queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.hub.command_capacity == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "hub command capacity must be greater than 0".to_string(),
            ));
        }

        if self.database.url.is_some() && self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid websocket configuration: {0}")]
    InvalidWebSocketConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
