use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::gateway::{
    intents, invite_url, BotIdentity, ChatClient, ChatEvent, ChatGateway, GatewayError,
};
use crate::shared::models::BotStatus;
use crate::storage::{BotStore, StorageError};
use crate::templates;

pub const PRESENCE_TEXT: &str = "Made by BotForge";
pub const APP_DESCRIPTION: &str =
    "Made by botforge.vercel.app, best and easiest discord bot maker!";

type StatusListener = Box<dyn Fn(i32, &str, Option<serde_json::Value>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Transient connection state of a managed bot, separate from the
/// persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Starting,
    Online,
    Offline,
    Error,
}

#[derive(Clone)]
pub struct BotInstance {
    pub id: i32,
    pub client: Arc<dyn ChatClient>,
    pub template_id: String,
    pub status: InstanceStatus,
}

/// Owns every live bot connection and drives deploy/stop transitions.
///
/// A single status listener receives every transition; registering a
/// new one replaces the previous.
pub struct BotLifecycleManager {
    storage: Arc<dyn BotStore>,
    gateway: Arc<dyn ChatGateway>,
    instances: Mutex<HashMap<i32, BotInstance>>,
    status_listener: Mutex<Option<StatusListener>>,
}

impl BotLifecycleManager {
    pub fn new(storage: Arc<dyn BotStore>, gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            storage,
            gateway,
            instances: Mutex::new(HashMap::new()),
            status_listener: Mutex::new(None),
        }
    }

    pub fn on_status_change<F>(&self, listener: F)
    where
        F: Fn(i32, &str, Option<serde_json::Value>) + Send + Sync + 'static,
    {
        *self.status_listener.lock().unwrap() = Some(Box::new(listener));
    }

    fn emit(&self, bot_id: i32, status: &str, data: Option<serde_json::Value>) {
        if let Some(listener) = self.status_listener.lock().unwrap().as_ref() {
            listener(bot_id, status, data);
        }
    }

    pub async fn validate_token(&self, token: &str) -> Result<BotIdentity, GatewayError> {
        self.gateway.validate_credential(token).await
    }

    /// Brings a bot online: persists `deploying`, connects with the
    /// managed intent set, installs the template, then persists the
    /// terminal state. The error is re-raised after being recorded.
    pub async fn deploy_bot(
        self: &Arc<Self>,
        bot_id: i32,
        token: &str,
        template_id: &str,
        config: &serde_json::Value,
    ) -> Result<(), DeployError> {
        self.storage
            .update_bot_status(bot_id, BotStatus::Deploying.as_str(), None)?;
        self.emit(bot_id, BotStatus::Deploying.as_str(), None);

        match self.try_deploy(bot_id, token, template_id, config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to deploy bot {}: {}", bot_id, e);
                if let Err(persist) =
                    self.storage
                        .update_bot_status(bot_id, BotStatus::Error.as_str(), None)
                {
                    error!("Failed to record error state for bot {}: {}", bot_id, persist);
                }
                self.emit(
                    bot_id,
                    BotStatus::Error.as_str(),
                    Some(json!({ "error": e.to_string() })),
                );
                self.set_instance_status(bot_id, InstanceStatus::Error);
                Err(e)
            }
        }
    }

    async fn try_deploy(
        self: &Arc<Self>,
        bot_id: i32,
        token: &str,
        template_id: &str,
        config: &serde_json::Value,
    ) -> Result<(), DeployError> {
        let client = self.gateway.connect(token, intents::MANAGED_BOT).await?;

        // Template dispatcher and watcher subscribe before open so the
        // Ready event reaches them.
        templates::install(client.clone(), template_id, config);
        let events = client.subscribe();

        self.instances.lock().unwrap().insert(
            bot_id,
            BotInstance {
                id: bot_id,
                client: client.clone(),
                template_id: template_id.to_string(),
                status: InstanceStatus::Starting,
            },
        );

        let ready = client.open().await?;
        info!("Bot {} is ready!", ready.identity.tag());

        if let Err(e) = client.set_presence(PRESENCE_TEXT).await {
            warn!("Could not update bot presence: {}", e);
        }
        if let Err(e) = client.update_description(APP_DESCRIPTION).await {
            warn!("Could not update bot description: {}", e);
        }

        let invite = invite_url(&ready.identity.id, templates::permissions_for(template_id));

        self.storage
            .update_bot_status(bot_id, BotStatus::Online.as_str(), Some(Utc::now()))?;
        self.storage.update_bot_invite_url(bot_id, &invite)?;
        if let Some(bot) = self.storage.get_bot(bot_id)? {
            self.storage
                .update_bot_guild_count(bot_id, ready.guild_count)?;
            if bot.discord_bot_id.is_none() {
                self.storage
                    .update_bot_vendor_id(bot_id, &ready.identity.id)?;
            }
        }

        self.set_instance_status(bot_id, InstanceStatus::Online);
        self.emit(
            bot_id,
            BotStatus::Online.as_str(),
            Some(json!({
                "botTag": ready.identity.tag(),
                "inviteUrl": invite,
                "guildCount": ready.guild_count,
            })),
        );

        let manager = self.clone();
        tokio::spawn(async move {
            manager.watch(bot_id, events).await;
        });
        Ok(())
    }

    /// Mirrors later connection trouble into the persisted record and
    /// the push channel.
    async fn watch(
        &self,
        bot_id: i32,
        mut events: tokio::sync::broadcast::Receiver<ChatEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(ChatEvent::Errored(reason)) => {
                    error!("Bot {} error: {}", bot_id, reason);
                    if let Err(e) =
                        self.storage
                            .update_bot_status(bot_id, BotStatus::Error.as_str(), None)
                    {
                        error!("Failed to persist error for bot {}: {}", bot_id, e);
                    }
                    self.set_instance_status(bot_id, InstanceStatus::Error);
                    self.emit(
                        bot_id,
                        BotStatus::Error.as_str(),
                        Some(json!({ "error": reason })),
                    );
                }
                Ok(ChatEvent::Disconnected) => {
                    // A stop_bot call already untracked the instance and
                    // recorded the transition itself.
                    let still_tracked =
                        self.instances.lock().unwrap().contains_key(&bot_id);
                    if still_tracked {
                        info!("Bot {} disconnected", bot_id);
                        if let Err(e) = self.storage.update_bot_status(
                            bot_id,
                            BotStatus::Offline.as_str(),
                            None,
                        ) {
                            error!("Failed to persist offline for bot {}: {}", bot_id, e);
                        }
                        self.set_instance_status(bot_id, InstanceStatus::Offline);
                        self.emit(bot_id, BotStatus::Offline.as_str(), None);
                    }
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn set_instance_status(&self, bot_id: i32, status: InstanceStatus) {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(&bot_id) {
            instance.status = status;
        }
    }

    /// Stops a running bot. A bot without a live instance is left
    /// untouched, with no transition recorded.
    pub async fn stop_bot(&self, bot_id: i32) -> Result<(), StorageError> {
        let instance = self.instances.lock().unwrap().remove(&bot_id);
        if let Some(instance) = instance {
            instance.client.disconnect().await;
            self.storage
                .update_bot_status(bot_id, BotStatus::Offline.as_str(), None)?;
            self.emit(bot_id, BotStatus::Offline.as_str(), None);
        }
        Ok(())
    }

    pub fn get_bot_instance(&self, bot_id: i32) -> Option<BotInstance> {
        self.instances.lock().unwrap().get(&bot_id).cloned()
    }

    pub fn get_all_running_bots(&self) -> Vec<BotInstance> {
        self.instances.lock().unwrap().values().cloned().collect()
    }
}
