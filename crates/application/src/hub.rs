//! 连接 Hub
//!
//! Hub 独占在线连接注册表。注册、注销以及所有扇出决策都在同一个控制循环里
//! 串行执行，外部只能通过命令队列访问注册表，因此注册表本身不需要任何锁。
//!
//! 投递一律是非阻塞入队：目标连接的出站队列已满时立即驱逐该连接
//! （关闭其队列并从注册表移除），一个卡住的客户端不会拖慢对其他连接的扇出。

use std::collections::HashMap;
use std::sync::Arc;

use config::{HubConfig, SessionPolicy};
use domain::{ConnectionId, ServerEvent, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HubError;

/// 出站队列条目，一次广播的所有接收方共享同一份事件
pub type Outbound = Arc<ServerEvent>;

/// 注册表中的一条连接
///
/// Hub 持有出站队列发送端的唯一副本，条目被移除即意味着队列关闭，
/// 对应连接的出站泵会在排空已缓冲的条目后退出。
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: UserId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            user_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

/// 注册表快照中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

enum HubCommand {
    Register {
        handle: ConnectionHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister(ConnectionId),
    Unicast {
        user_id: UserId,
        event: Outbound,
    },
    Broadcast {
        event: Outbound,
        except: Option<UserId>,
    },
    Snapshot(oneshot::Sender<Vec<ConnectionSummary>>),
}

/// 单次扇出的结果
#[derive(Debug, Default)]
struct Delivery {
    delivered: usize,
    evicted: Vec<ConnectionId>,
}

/// 只在控制循环内部存在的注册表
struct Registry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    policy: SessionPolicy,
}

impl Registry {
    fn new(policy: SessionPolicy) -> Self {
        Self {
            connections: HashMap::new(),
            policy,
        }
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { handle, ack } => {
                self.register(handle);
                let _ = ack.send(());
            }
            HubCommand::Unregister(connection_id) => {
                self.unregister(connection_id);
            }
            HubCommand::Unicast { user_id, event } => {
                let delivery = self.deliver(&event, |handle| handle.user_id == user_id);
                if delivery.delivered == 0 && delivery.evicted.is_empty() {
                    debug!(user_id = %user_id, "目标用户没有已注册的连接，跳过实时投递");
                }
            }
            HubCommand::Broadcast { event, except } => {
                let delivery =
                    self.deliver(&event, |handle| except.as_ref() != Some(&handle.user_id));
                debug!(
                    delivered = delivery.delivered,
                    evicted = delivery.evicted.len(),
                    "广播完成"
                );
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// 同一实例重复注册是幂等的；按会话策略决定是否驱逐同一用户的旧连接
    fn register(&mut self, handle: ConnectionHandle) {
        if self.policy == SessionPolicy::ReplaceExisting {
            let replaced: Vec<ConnectionId> = self
                .connections
                .values()
                .filter(|existing| existing.user_id == handle.user_id && existing.id != handle.id)
                .map(|existing| existing.id)
                .collect();

            for connection_id in replaced {
                self.connections.remove(&connection_id);
                info!(
                    connection_id = %connection_id,
                    user_id = %handle.user_id,
                    "同一用户建立了新连接，旧连接被驱逐"
                );
            }
        }

        let connection_id = handle.id;
        let user_id = handle.user_id.clone();
        self.connections.insert(connection_id, handle);

        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            total = self.connections.len(),
            "连接已注册"
        );
    }

    fn unregister(&mut self, connection_id: ConnectionId) -> bool {
        match self.connections.remove(&connection_id) {
            Some(handle) => {
                info!(
                    connection_id = %connection_id,
                    user_id = %handle.user_id,
                    total = self.connections.len(),
                    "连接已注销"
                );
                true
            }
            None => {
                debug!(connection_id = %connection_id, "连接不在注册表中，忽略注销");
                false
            }
        }
    }

    fn deliver<F>(&mut self, event: &Outbound, matches: F) -> Delivery
    where
        F: Fn(&ConnectionHandle) -> bool,
    {
        let mut delivery = Delivery::default();

        for handle in self.connections.values().filter(|handle| matches(*handle)) {
            match handle.outbound.try_send(Arc::clone(event)) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection_id = %handle.id,
                        user_id = %handle.user_id,
                        "出站队列已满，驱逐慢消费者"
                    );
                    delivery.evicted.push(handle.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = %handle.id, "出站泵已退出，移除连接");
                    delivery.evicted.push(handle.id);
                }
            }
        }

        // 移除条目即丢弃发送端，出站队列随之关闭
        for connection_id in &delivery.evicted {
            self.connections.remove(connection_id);
        }

        delivery
    }

    fn snapshot(&self) -> Vec<ConnectionSummary> {
        self.connections
            .values()
            .map(|handle| ConnectionSummary {
                connection_id: handle.id,
                user_id: handle.user_id.clone(),
            })
            .collect()
    }
}

async fn run(mut registry: Registry, mut commands: mpsc::Receiver<HubCommand>) {
    info!(policy = ?registry.policy, "Hub 控制循环启动");

    while let Some(command) = commands.recv().await {
        registry.apply(command);
    }

    info!(
        remaining = registry.connections.len(),
        "Hub 控制循环退出"
    );
}

/// Hub 的句柄，克隆开销很小
///
/// 所有方法只是把命令放进控制循环的队列；命令按发送顺序被执行，
/// 因此先注册、后广播的连接一定能收到这次广播。
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// 启动控制循环。所有 `Hub` 句柄都被丢弃后循环退出
    pub fn spawn(config: &HubConfig, policy: SessionPolicy) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(config.command_capacity);
        let task = tokio::spawn(run(Registry::new(policy), receiver));
        (Self { commands }, task)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// 注册连接，返回时注册已在控制循环中生效
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Register { handle, ack }).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// 注销连接并关闭其出站队列，连接不存在时什么也不做
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(connection_id)).await
    }

    /// 投递给该用户所有已注册的连接，没有匹配的连接不算错误
    pub async fn unicast(&self, user_id: &UserId, event: ServerEvent) -> Result<(), HubError> {
        self.send(HubCommand::Unicast {
            user_id: user_id.clone(),
            event: Arc::new(event),
        })
        .await
    }

    pub async fn broadcast(&self, event: ServerEvent) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            event: Arc::new(event),
            except: None,
        })
        .await
    }

    /// 投递给除 `exclude` 用户之外的所有连接
    pub async fn broadcast_except(
        &self,
        event: ServerEvent,
        exclude: &UserId,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            event: Arc::new(event),
            except: Some(exclude.clone()),
        })
        .await
    }

    /// 在控制循环内拍摄的注册表快照
    pub async fn connections(&self) -> Result<Vec<ConnectionSummary>, HubError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(HubCommand::Snapshot(reply)).await?;
        snapshot.await.map_err(|_| HubError::Closed)
    }

    pub async fn user_connection_count(&self, user_id: &UserId) -> Result<usize, HubError> {
        let connections = self.connections().await?;
        Ok(connections
            .iter()
            .filter(|summary| &summary.user_id == user_id)
            .count())
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            commands: self.commands.downgrade(),
        }
    }
}

/// 连接持有的弱引用，只用来注册和注销自己，不会让 Hub 存活得更久
#[derive(Clone)]
pub struct WeakHub {
    commands: mpsc::WeakSender<HubCommand>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.commands.upgrade().map(|commands| Hub { commands })
    }

    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.upgrade().ok_or(HubError::Closed)?.register(handle).await
    }

    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.upgrade()
            .ok_or(HubError::Closed)?
            .unregister(connection_id)
            .await
    }
}
