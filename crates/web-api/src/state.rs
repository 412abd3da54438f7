use std::sync::Arc;

use application::{EventDispatcher, Hub, MessageStore, PresenceStore};
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub hub: Hub,
    pub dispatcher: Arc<EventDispatcher>,
    pub presence: Arc<dyn PresenceStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        hub: Hub,
        presence: Arc<dyn PresenceStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new(
            hub.clone(),
            presence.clone(),
            messages.clone(),
            &config.delivery,
        ));

        Self {
            config: Arc::new(config),
            hub,
            dispatcher,
            presence,
            messages,
        }
    }
}
