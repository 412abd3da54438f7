#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{Hub, MemoryMessageStore, MemoryPresenceStore};
use config::AppConfig;
use domain::{UserId, UserSummary};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout, Instant},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 在随机端口上运行的测试服务，使用内存协作者
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Hub,
    pub presence: Arc<MemoryPresenceStore>,
    pub messages: Arc<MemoryMessageStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AppConfig::default()).await
    }

    /// u1(alice) 与 u2(bob) 在上游被标记为在线
    pub async fn start_with(config: AppConfig) -> Self {
        config.validate().expect("valid test config");

        let presence = Arc::new(
            MemoryPresenceStore::with_users([
                UserSummary::new("u1", "alice", true),
                UserSummary::new("u2", "bob", true),
                UserSummary::new("u3", "carol", false),
            ])
            .await,
        );
        let messages = Arc::new(MemoryMessageStore::new());

        let (hub, _hub_task) = Hub::spawn(&config.hub, config.websocket.session_policy);
        let state = AppState::new(config, hub.clone(), presence.clone(), messages.clone());
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            hub,
            presence,
            messages,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, user_id: &str) -> Client {
        let url = format!("ws://{}/ws/{}", self.addr, user_id);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        ws
    }

    /// 轮询 Hub 快照，直到该用户的连接数等于 `expected`
    pub async fn wait_for_connections(&self, user_id: &str, expected: usize) {
        let user_id = UserId::from(user_id);
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let count = self
                .hub
                .user_connection_count(&user_id)
                .await
                .expect("hub running");
            if count == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "user {user_id} has {count} connections, expected {expected}"
            );
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一个文本帧并解析为 JSON，跳过心跳帧
pub async fn next_event(ws: &mut Client) -> Value {
    try_next_event(ws, Duration::from_secs(3))
        .await
        .expect("expected a text frame")
}

/// 在 `wait` 内读取下一个文本帧；超时或连接结束返回 `None`
pub async fn try_next_event(ws: &mut Client, wait: Duration) -> Option<Value> {
    let deadline = Instant::now() + wait;
    loop {
        let frame = timeout(deadline.saturating_duration_since(Instant::now()), ws.next())
            .await
            .ok()??;
        match frame {
            Ok(TungsteniteMessage::Text(payload)) => {
                return Some(serde_json::from_str(payload.as_str()).expect("json frame"));
            }
            Ok(TungsteniteMessage::Ping(_)) | Ok(TungsteniteMessage::Pong(_)) => continue,
            Ok(_) | Err(_) => return None,
        }
    }
}

/// 连接是否已被服务端关闭（收到关闭帧、读到流结束或读取出错）
pub async fn closed_by_server(ws: &mut Client, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        match timeout(deadline.saturating_duration_since(Instant::now()), ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(TungsteniteMessage::Close(_)))) => {
                return true
            }
            Ok(Some(Ok(_))) => continue,
        }
    }
}

pub fn text(value: Value) -> TungsteniteMessage {
    TungsteniteMessage::Text(value.to_string().into())
}
