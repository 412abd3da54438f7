//! 入站事件分发器
//!
//! 把解码后的客户端事件路由到各自的处理器。处理器可以查询外部协作者，
//! 再通过 Hub 单播或广播结果。处理器的任何失败都只记录日志，
//! 不会拆除发起事件的连接，更不会影响 Hub。

use std::sync::Arc;

use config::DeliveryConfig;
use domain::{ClientEvent, NewMessage, ServerEvent, UserId, UserSummary};
use tracing::{debug, info, warn};

use crate::{
    error::ApplicationError, hub::Hub, presence::PresenceStore, repository::MessageStore,
};

#[derive(Clone)]
pub struct EventDispatcher {
    hub: Hub,
    presence: Arc<dyn PresenceStore>,
    messages: Arc<dyn MessageStore>,
    require_persistence: bool,
}

impl EventDispatcher {
    pub fn new(
        hub: Hub,
        presence: Arc<dyn PresenceStore>,
        messages: Arc<dyn MessageStore>,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            hub,
            presence,
            messages,
            require_persistence: delivery.require_persistence,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// 处理一个入站事件，失败只记录日志
    pub async fn dispatch(&self, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::Join(user_id) => self.handle_join(user_id).await,
            ClientEvent::Leave(user_id) => self.handle_leave(user_id).await,
            ClientEvent::Message(message) => self.handle_message(message).await,
        };

        if let Err(err) = result {
            warn!(event = name, error = %err, "事件处理失败");
        }
    }

    /// 连接注册完成后，以该连接的用户身份执行一次 `join`
    pub async fn connection_opened(&self, user_id: &UserId) {
        self.dispatch(ClientEvent::Join(user_id.clone())).await;
    }

    /// 连接注销后调用；用户已没有其他在线连接时才执行 `disconnect`
    pub async fn connection_closed(&self, user_id: &UserId) {
        match self.hub.user_connection_count(user_id).await {
            Ok(0) => self.dispatch(ClientEvent::Leave(user_id.clone())).await,
            Ok(remaining) => {
                debug!(user_id = %user_id, remaining, "用户仍有其他连接，不广播离线");
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "无法查询用户剩余连接");
            }
        }
    }

    async fn handle_join(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let Some(user) = self.presence.lookup_by_id(&user_id).await? else {
            warn!(user_id = %user_id, "未知用户尝试连接聊天服务");
            return Ok(());
        };

        if !user.online {
            info!(user_id = %user_id, "离线用户尝试连接聊天服务");
            return Ok(());
        }

        self.hub
            .broadcast_except(ServerEvent::new_user_joined(user), &user_id)
            .await?;

        // 名单查询失败时退化为空名单，而不是让加入失败
        let roster = match self.presence.online_users(&user_id).await {
            Ok(roster) => roster,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "获取在线名单失败，返回空名单");
                Vec::new()
            }
        };

        self.hub
            .unicast(&user_id, ServerEvent::my_chatlist(roster))
            .await?;
        Ok(())
    }

    async fn handle_leave(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let user = match self.presence.lookup_by_id(&user_id).await {
            Ok(user) => user,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "查询离线用户失败");
                None
            }
        };

        if let Err(err) = self.presence.set_online(&user_id, false).await {
            warn!(user_id = %user_id, error = %err, "更新离线状态失败");
        }

        let summary = user
            .map(|user| user.offline())
            .unwrap_or_else(|| UserSummary::new(user_id.clone(), String::new(), false));

        self.hub
            .broadcast(ServerEvent::user_disconnected(summary))
            .await?;
        info!(user_id = %user_id, "用户已离线");
        Ok(())
    }

    /// 持久化与实时投递相互独立：默认即使写入失败也会实时投递，
    /// 开启 `require_persistence` 后只投递写入成功的消息
    async fn handle_message(&self, message: NewMessage) -> Result<(), ApplicationError> {
        if let Err(err) = message.validate() {
            debug!(error = %err, "忽略不完整的消息");
            return Ok(());
        }

        match self.messages.append(message.clone()).await {
            Ok(stored) => {
                debug!(message_id = %stored.id, to = %stored.to_user_id, "消息已保存");
            }
            Err(err) if self.require_persistence => return Err(err.into()),
            Err(err) => {
                warn!(
                    from = %message.from_user_id,
                    to = %message.to_user_id,
                    error = %err,
                    "消息保存失败，仍然实时投递"
                );
            }
        }

        let recipient = message.to_user_id.clone();
        self.hub
            .unicast(&recipient, ServerEvent::message_response(message))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::hub::{ConnectionHandle, Outbound};
    use crate::presence::{memory::MemoryPresenceStore, MockPresenceStore};
    use crate::repository::{memory::MemoryMessageStore, MockMessageStore};
    use config::{HubConfig, SessionPolicy};
    use domain::{ChatMessage, ChatlistKind, ConnectionId};
    use tokio::sync::mpsc;

    struct Harness {
        dispatcher: EventDispatcher,
        hub: Hub,
    }

    fn harness(
        presence: Arc<dyn PresenceStore>,
        messages: Arc<dyn MessageStore>,
        require_persistence: bool,
    ) -> Harness {
        let (hub, _task) = Hub::spawn(&HubConfig::default(), SessionPolicy::Coexist);
        let dispatcher = EventDispatcher::new(
            hub.clone(),
            presence,
            messages,
            &DeliveryConfig {
                require_persistence,
            },
        );
        Harness { dispatcher, hub }
    }

    async fn connect(hub: &Hub, user: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(16);
        hub.register(ConnectionHandle::new(ConnectionId::new(), UserId::from(user), tx))
            .await
            .unwrap();
        rx
    }

    async fn drain(hub: &Hub, rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        hub.connections().await.unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    async fn online_pair() -> Arc<MemoryPresenceStore> {
        Arc::new(
            MemoryPresenceStore::with_users([
                UserSummary::new("u1", "alice", true),
                UserSummary::new("u2", "bob", true),
            ])
            .await,
        )
    }

    #[tokio::test]
    async fn join_announces_to_others_and_sends_roster_to_joiner() {
        let h = harness(online_pair().await, Arc::new(MemoryMessageStore::new()), false);
        let mut b = connect(&h.hub, "u2").await;
        let mut a = connect(&h.hub, "u1").await;

        h.dispatcher.connection_opened(&UserId::from("u1")).await;

        assert_eq!(
            drain(&h.hub, &mut a).await,
            vec![ServerEvent::my_chatlist(vec![UserSummary::new("u2", "bob", true)])]
        );
        assert_eq!(
            drain(&h.hub, &mut b).await,
            vec![ServerEvent::new_user_joined(UserSummary::new("u1", "alice", true))]
        );
    }

    #[tokio::test]
    async fn join_of_offline_or_unknown_user_has_no_effect() {
        let presence = Arc::new(
            MemoryPresenceStore::with_users([
                UserSummary::new("u1", "alice", false),
                UserSummary::new("u2", "bob", true),
            ])
            .await,
        );
        let h = harness(presence, Arc::new(MemoryMessageStore::new()), false);
        let mut a = connect(&h.hub, "u1").await;
        let mut b = connect(&h.hub, "u2").await;

        h.dispatcher.dispatch(ClientEvent::Join(UserId::from("u1"))).await;
        h.dispatcher.dispatch(ClientEvent::Join(UserId::from("ghost"))).await;

        assert!(drain(&h.hub, &mut a).await.is_empty());
        assert!(drain(&h.hub, &mut b).await.is_empty());
    }

    #[tokio::test]
    async fn join_degrades_to_empty_roster_when_listing_fails() {
        let mut presence = MockPresenceStore::new();
        presence
            .expect_lookup_by_id()
            .returning(|id| Ok(Some(UserSummary::new(id.clone(), "alice", true))));
        presence
            .expect_online_users()
            .returning(|_| Err(StoreError::unavailable("redis down")));

        let h = harness(Arc::new(presence), Arc::new(MemoryMessageStore::new()), false);
        let mut a = connect(&h.hub, "u1").await;

        h.dispatcher.dispatch(ClientEvent::Join(UserId::from("u1"))).await;

        assert_eq!(
            drain(&h.hub, &mut a).await,
            vec![ServerEvent::my_chatlist(Vec::new())]
        );
    }

    #[tokio::test]
    async fn leave_marks_offline_and_broadcasts_to_everyone() {
        let presence = online_pair().await;
        let h = harness(presence.clone(), Arc::new(MemoryMessageStore::new()), false);
        let mut a = connect(&h.hub, "u1").await;
        let mut b = connect(&h.hub, "u2").await;

        h.dispatcher.dispatch(ClientEvent::Leave(UserId::from("u1"))).await;

        let expected = ServerEvent::user_disconnected(UserSummary::new("u1", "alice", false));
        assert_eq!(drain(&h.hub, &mut a).await, vec![expected.clone()]);
        assert_eq!(drain(&h.hub, &mut b).await, vec![expected]);

        let stored = presence.lookup_by_id(&UserId::from("u1")).await.unwrap().unwrap();
        assert!(!stored.online);
    }

    #[tokio::test]
    async fn leave_still_broadcasts_when_presence_store_fails() {
        let mut presence = MockPresenceStore::new();
        presence
            .expect_lookup_by_id()
            .returning(|_| Err(StoreError::unavailable("down")));
        presence
            .expect_set_online()
            .times(1)
            .returning(|_, _| Err(StoreError::unavailable("down")));

        let h = harness(Arc::new(presence), Arc::new(MemoryMessageStore::new()), false);
        let mut b = connect(&h.hub, "u2").await;

        h.dispatcher.dispatch(ClientEvent::Leave(UserId::from("u1"))).await;

        assert_eq!(
            drain(&h.hub, &mut b).await,
            vec![ServerEvent::user_disconnected(UserSummary::new("u1", "", false))]
        );
    }

    #[tokio::test]
    async fn connection_closed_only_announces_last_session() {
        let presence = online_pair().await;
        let h = harness(presence.clone(), Arc::new(MemoryMessageStore::new()), false);
        let mut observer = connect(&h.hub, "u2").await;
        let _second_session = connect(&h.hub, "u1").await;

        h.dispatcher.connection_closed(&UserId::from("u1")).await;
        assert!(drain(&h.hub, &mut observer).await.is_empty());
        assert!(presence.lookup_by_id(&UserId::from("u1")).await.unwrap().unwrap().online);

        h.dispatcher.connection_closed(&UserId::from("u3")).await;
        let events = drain(&h.hub, &mut observer).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::ChatlistResponse(response) if response.kind == ChatlistKind::UserDisconnected
        ));
    }

    #[tokio::test]
    async fn message_is_stored_and_unicast_to_recipient_only() {
        let messages = Arc::new(MemoryMessageStore::new());
        let h = harness(online_pair().await, messages.clone(), false);
        let mut a = connect(&h.hub, "u1").await;
        let mut b = connect(&h.hub, "u2").await;
        let mut c = connect(&h.hub, "u3").await;

        let message = NewMessage::new("u1", "u2", "hi");
        h.dispatcher.dispatch(ClientEvent::Message(message.clone())).await;

        assert_eq!(
            drain(&h.hub, &mut b).await,
            vec![ServerEvent::message_response(message.clone())]
        );
        assert!(drain(&h.hub, &mut a).await.is_empty());
        assert!(drain(&h.hub, &mut c).await.is_empty());

        let stored = messages.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].from_user_id, message.from_user_id);
        assert_eq!(stored[0].to_user_id, message.to_user_id);
        assert_eq!(stored[0].message, "hi");
    }

    #[tokio::test]
    async fn incomplete_message_is_ignored() {
        let messages = Arc::new(MemoryMessageStore::new());
        let h = harness(online_pair().await, messages.clone(), false);
        let mut b = connect(&h.hub, "u2").await;

        h.dispatcher
            .dispatch(ClientEvent::Message(NewMessage::new("u1", "u2", "")))
            .await;

        assert!(drain(&h.hub, &mut b).await.is_empty());
        assert_eq!(messages.len().await, 0);
    }

    #[tokio::test]
    async fn message_is_delivered_even_if_persistence_fails() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_| Err(StoreError::storage("disk full")));

        let h = harness(online_pair().await, Arc::new(store), false);
        let mut b = connect(&h.hub, "u2").await;

        let message = NewMessage::new("u1", "u2", "hi");
        h.dispatcher.dispatch(ClientEvent::Message(message.clone())).await;

        assert_eq!(
            drain(&h.hub, &mut b).await,
            vec![ServerEvent::message_response(message)]
        );
    }

    #[tokio::test]
    async fn required_persistence_gates_live_delivery() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_| Err(StoreError::storage("disk full")));

        let h = harness(online_pair().await, Arc::new(store), true);
        let mut b = connect(&h.hub, "u2").await;

        h.dispatcher
            .dispatch(ClientEvent::Message(NewMessage::new("u1", "u2", "hi")))
            .await;

        assert!(drain(&h.hub, &mut b).await.is_empty());
    }

    #[tokio::test]
    async fn required_persistence_delivers_after_successful_append() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|message| Ok(ChatMessage::from_new(message, chrono::Utc::now())));

        let h = harness(online_pair().await, Arc::new(store), true);
        let mut b = connect(&h.hub, "u2").await;

        let message = NewMessage::new("u1", "u2", "hi");
        h.dispatcher.dispatch(ClientEvent::Message(message.clone())).await;

        assert_eq!(
            drain(&h.hub, &mut b).await,
            vec![ServerEvent::message_response(message)]
        );
    }
}
