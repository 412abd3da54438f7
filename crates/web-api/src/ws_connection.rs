use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use application::{ConnectionHandle, EventDispatcher, Outbound, WeakHub};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use config::WebSocketConfig;
use domain::{decode_client_frame, encode_frame, ConnectionId, ConnectionState, FrameError, UserId};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::state::AppState;

/// 收发泵使用的超时与限额
#[derive(Debug, Clone)]
pub(crate) struct PumpSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_frame_bytes: usize,
    pub queue_capacity: usize,
}

impl From<&WebSocketConfig> for PumpSettings {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            max_frame_bytes: config.max_frame_bytes,
            queue_capacity: config.outbound_queue_capacity,
        }
    }
}

/// 泵退出的原因，只用于日志和测试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    PeerClosed,
    ReadTimeout,
    TransportError,
    OversizedFrame,
    MalformedFrame,
    QueueClosed,
    WriteFailed,
    WriteTimeout,
    Cancelled,
}

/// 单条 WebSocket 会话
///
/// 状态机为 `Connecting → Active → Closed`。注册到 Hub 后进入 `Active`，
/// 由入站泵和出站泵两个任务驱动；任一泵退出即触发拆除。
/// 连接只持有 Hub 的弱引用，仅用于注册与注销。
pub struct WebSocketConnection {
    id: ConnectionId,
    user_id: UserId,
    hub: WeakHub,
    dispatcher: Arc<EventDispatcher>,
    settings: PumpSettings,
    lifecycle: ConnectionState,
}

impl WebSocketConnection {
    pub fn new(state: &AppState, user_id: UserId) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            hub: state.hub.downgrade(),
            dispatcher: state.dispatcher.clone(),
            settings: PumpSettings::from(&state.config.websocket),
            lifecycle: ConnectionState::Connecting,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        match self.lifecycle.transition(next) {
            Ok(state) => self.lifecycle = state,
            Err(err) => {
                tracing::warn!(connection_id = %self.id, error = %err, "连接状态迁移被拒绝")
            }
        }
    }

    /// 运行连接直到拆除完成
    pub async fn run(mut self, socket: WebSocket) {
        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_capacity);
        let handle = ConnectionHandle::new(self.id, self.user_id.clone(), queue_tx);

        if let Err(err) = self.hub.register(handle).await {
            tracing::error!(user_id = %self.user_id, error = %err, "注册连接失败");
            self.transition(ConnectionState::Closed);
            return;
        }
        self.transition(ConnectionState::Active);
        tracing::info!(connection_id = %self.id, user_id = %self.user_id, "WebSocket 连接已建立");

        let (sink, stream) = socket.split();
        let mut outbound = tokio::spawn(outbound_pump(sink, queue_rx, self.settings.clone()));
        let mut inbound = tokio::spawn(inbound_pump(
            stream,
            self.dispatcher.clone(),
            self.settings.clone(),
        ));

        self.dispatcher.connection_opened(&self.user_id).await;

        // 等待任意一个泵退出
        let (inbound_exit, outbound_exit) = tokio::select! {
            exit = &mut inbound => {
                let inbound_exit = exit.unwrap_or(PumpExit::Cancelled);
                self.unregister().await;
                // 队列关闭后出站泵发出关闭帧并退出
                let outbound_exit = outbound.await.unwrap_or(PumpExit::Cancelled);
                (inbound_exit, outbound_exit)
            }
            exit = &mut outbound => {
                let outbound_exit = exit.unwrap_or(PumpExit::Cancelled);
                self.unregister().await;
                inbound.abort();
                let inbound_exit = inbound.await.unwrap_or(PumpExit::Cancelled);
                (inbound_exit, outbound_exit)
            }
        };

        self.dispatcher.connection_closed(&self.user_id).await;
        self.transition(ConnectionState::Closed);

        tracing::info!(
            connection_id = %self.id,
            user_id = %self.user_id,
            inbound = ?inbound_exit,
            outbound = ?outbound_exit,
            "WebSocket连接已断开"
        );
    }

    async fn unregister(&self) {
        if let Err(err) = self.hub.unregister(self.id).await {
            tracing::warn!(connection_id = %self.id, error = %err, "注销连接失败");
        }
    }
}

/// 入站泵：逐帧读取并分发
///
/// 读截止时间只在收到 pong 时刷新；客户端发来的 ping 由传输层自动回复 pong。
pub(crate) async fn inbound_pump<S>(
    mut stream: S,
    dispatcher: Arc<EventDispatcher>,
    settings: PumpSettings,
) -> PumpExit
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + settings.read_timeout;

    loop {
        let message = match time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::info!("读超时，未收到心跳响应");
                return PumpExit::ReadTimeout;
            }
            Ok(None) => return PumpExit::PeerClosed,
            Ok(Some(Err(err))) => {
                tracing::debug!(error = %err, "WebSocket读取失败");
                return PumpExit::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            WsMessage::Pong(_) => {
                deadline = Instant::now() + settings.read_timeout;
                continue;
            }
            WsMessage::Ping(_) => continue,
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return PumpExit::PeerClosed;
            }
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => text.into(),
                Err(_) => {
                    tracing::debug!("二进制帧不是合法的 UTF-8");
                    return PumpExit::MalformedFrame;
                }
            },
        };

        match decode_client_frame(text.as_str(), settings.max_frame_bytes) {
            Ok(Some(event)) => dispatcher.dispatch(event).await,
            Ok(None) => tracing::debug!("忽略无法识别的事件"),
            Err(FrameError::TooLarge { size, limit }) => {
                tracing::info!(size, limit, "入站帧超过大小限制");
                return PumpExit::OversizedFrame;
            }
            Err(err) => {
                tracing::info!(error = %err, "入站帧解码失败");
                return PumpExit::MalformedFrame;
            }
        }
    }
}

/// 出站泵：转发出站队列并定时发送心跳 ping
///
/// 队列关闭是唯一的退出信号；每次醒来把已缓冲的事件全部写入后只 flush 一次。
pub(crate) async fn outbound_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Outbound>,
    settings: PumpSettings,
) -> PumpExit
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let mut heartbeat = time::interval_at(
        Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = queue.recv() => {
                let Some(event) = item else {
                    let _ = time::timeout(settings.write_timeout, sink.send(WsMessage::Close(None))).await;
                    return PumpExit::QueueClosed;
                };
                if let Err(exit) = write_batch(&mut sink, &mut queue, event, settings.write_timeout).await {
                    return exit;
                }
            }
            _ = heartbeat.tick() => {
                match time::timeout(settings.write_timeout, sink.send(WsMessage::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(error = %err, "发送心跳失败");
                        return PumpExit::WriteFailed;
                    }
                    Err(_) => return PumpExit::WriteTimeout,
                }
            }
        }
    }
}

async fn write_batch<S>(
    sink: &mut S,
    queue: &mut mpsc::Receiver<Outbound>,
    first: Outbound,
    write_timeout: Duration,
) -> Result<(), PumpExit>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let write = async {
        let mut next = Some(first);
        while let Some(event) = next {
            match encode_frame(&event) {
                Ok(payload) => sink.feed(WsMessage::Text(payload.into())).await?,
                Err(err) => tracing::warn!(error = %err, "failed to serialize websocket payload"),
            }
            next = queue.try_recv().ok();
        }
        sink.flush().await
    };

    match time::timeout(write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "WebSocket写入失败");
            Err(PumpExit::WriteFailed)
        }
        Err(_) => {
            tracing::info!("WebSocket写入超时");
            Err(PumpExit::WriteTimeout)
        }
    }
}
