use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::{
    BotIdentity, ChatClient, ChatEvent, ChatGateway, CommandSpec, GatewayError, GuildInfo,
    MemberInfo, OutboundMessage, ReadyInfo, ReplyTarget, Sender,
};

/// Failure a test can script into the fake vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    InvalidToken,
    Network,
}

impl FakeFailure {
    fn into_error(self) -> GatewayError {
        match self {
            Self::InvalidToken => GatewayError::InvalidToken,
            Self::Network => GatewayError::Network("scripted failure".to_string()),
        }
    }
}

/// Scripted vendor for lifecycle and template tests. Records every
/// outbound action so assertions can replay them.
pub struct FakeGateway {
    identity: BotIdentity,
    guild_count: i32,
    fail_validate: Mutex<Option<FakeFailure>>,
    fail_open: Mutex<Option<FakeFailure>>,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            identity: BotIdentity {
                id: "90001".to_string(),
                username: "testbot".to_string(),
                discriminator: "0001".to_string(),
            },
            guild_count: 3,
            fail_validate: Mutex::new(None),
            fail_open: Mutex::new(None),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_validate_with(&self, failure: FakeFailure) {
        *self.fail_validate.lock().unwrap() = Some(failure);
    }

    pub fn fail_open_with(&self, failure: FakeFailure) {
        *self.fail_open.lock().unwrap() = Some(failure);
    }

    pub fn last_client(&self) -> Option<Arc<FakeClient>> {
        self.clients.lock().unwrap().last().cloned()
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatGateway for FakeGateway {
    async fn validate_credential(&self, _token: &str) -> Result<BotIdentity, GatewayError> {
        if let Some(failure) = *self.fail_validate.lock().unwrap() {
            return Err(failure.into_error());
        }
        Ok(self.identity.clone())
    }

    async fn connect(
        &self,
        token: &str,
        _intents: u64,
    ) -> Result<Arc<dyn ChatClient>, GatewayError> {
        let (events, _) = broadcast::channel(64);
        let client = Arc::new(FakeClient {
            token: token.to_string(),
            identity: self.identity.clone(),
            scripted_guild_count: self.guild_count,
            fail_open: *self.fail_open.lock().unwrap(),
            events,
            guild_count: AtomicI32::new(0),
            open: AtomicBool::new(false),
            actions: Mutex::new(Vec::new()),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

/// Outbound action recorded by [`FakeClient`].
#[derive(Debug, Clone)]
pub enum Action {
    RegisterCommands(Vec<String>),
    SetPresence(String),
    UpdateDescription(String),
    Send {
        channel_id: String,
        message: OutboundMessage,
    },
    Reply {
        message: OutboundMessage,
    },
    Kick {
        guild_id: String,
        user_id: String,
    },
    Ban {
        guild_id: String,
        user_id: String,
    },
    Timeout {
        guild_id: String,
        user_id: String,
        until: DateTime<Utc>,
    },
    BulkDelete {
        channel_id: String,
        count: u8,
    },
    React {
        message_id: String,
        emoji: String,
    },
    AddRole {
        user_id: String,
        role_id: String,
    },
    RemoveRole {
        user_id: String,
        role_id: String,
    },
    Disconnect,
}

pub struct FakeClient {
    pub token: String,
    identity: BotIdentity,
    scripted_guild_count: i32,
    fail_open: Option<FakeFailure>,
    events: broadcast::Sender<ChatEvent>,
    guild_count: AtomicI32,
    open: AtomicBool,
    pub actions: Mutex<Vec<Action>>,
}

impl FakeClient {
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait::async_trait]
impl ChatClient for FakeClient {
    async fn open(&self) -> Result<ReadyInfo, GatewayError> {
        if let Some(failure) = self.fail_open {
            return Err(failure.into_error());
        }
        self.guild_count
            .store(self.scripted_guild_count, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        let ready = ReadyInfo {
            identity: self.identity.clone(),
            guild_count: self.scripted_guild_count,
        };
        let _ = self.events.send(ChatEvent::Ready(ready.clone()));
        Ok(ready)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn identity(&self) -> Option<BotIdentity> {
        if self.is_open() {
            Some(self.identity.clone())
        } else {
            None
        }
    }

    fn guild_count(&self) -> i32 {
        self.guild_count.load(Ordering::SeqCst)
    }

    async fn register_commands(&self, commands: &[CommandSpec]) -> Result<(), GatewayError> {
        self.record(Action::RegisterCommands(
            commands.iter().map(|c| c.name.to_string()).collect(),
        ));
        Ok(())
    }

    async fn set_presence(&self, activity: &str) -> Result<(), GatewayError> {
        self.record(Action::SetPresence(activity.to_string()));
        Ok(())
    }

    async fn update_description(&self, description: &str) -> Result<(), GatewayError> {
        self.record(Action::UpdateDescription(description.to_string()));
        Ok(())
    }

    async fn send(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, GatewayError> {
        let id = {
            let mut actions = self.actions.lock().unwrap();
            actions.push(Action::Send {
                channel_id: channel_id.to_string(),
                message: message.clone(),
            });
            format!("msg-{}", actions.len())
        };
        Ok(id)
    }

    async fn reply(
        &self,
        _target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<(), GatewayError> {
        self.record(Action::Reply {
            message: message.clone(),
        });
        Ok(())
    }

    async fn kick(
        &self,
        guild_id: &str,
        user_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(Action::Kick {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(Action::Ban {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: &str,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        self.record(Action::Timeout {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            until,
        });
        Ok(())
    }

    async fn bulk_delete(&self, channel_id: &str, count: u8) -> Result<u8, GatewayError> {
        self.record(Action::BulkDelete {
            channel_id: channel_id.to_string(),
            count,
        });
        Ok(count)
    }

    async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, GatewayError> {
        Ok(GuildInfo {
            id: guild_id.to_string(),
            name: "Test Guild".to_string(),
            member_count: Some(42),
            owner_id: Some("10001".to_string()),
        })
    }

    async fn member_info(
        &self,
        _guild_id: &str,
        user_id: &str,
    ) -> Result<MemberInfo, GatewayError> {
        Ok(MemberInfo {
            user: Sender {
                id: user_id.to_string(),
                username: "member".to_string(),
                is_bot: false,
            },
            nick: None,
            joined_at: Some("2024-01-01T00:00:00Z".to_string()),
            roles: vec!["20001".to_string()],
        })
    }

    async fn react(
        &self,
        _channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        self.record(Action::React {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn add_role(
        &self,
        _guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        self.record(Action::AddRole {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        Ok(())
    }

    async fn remove_role(
        &self,
        _guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        self.record(Action::RemoveRole {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.record(Action::Disconnect);
        let _ = self.events.send(ChatEvent::Disconnected);
    }
}
