use std::sync::Arc;

use crate::config::AppConfig;
use crate::manager::BotLifecycleManager;
use crate::relay::StatusRelay;
use crate::storage::BotStore;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn BotStore>,
    pub manager: Arc<BotLifecycleManager>,
    pub relay: Arc<StatusRelay>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        storage: Arc<dyn BotStore>,
        manager: Arc<BotLifecycleManager>,
        relay: Arc<StatusRelay>,
    ) -> Self {
        Self {
            config,
            storage,
            manager,
            relay,
        }
    }
}
