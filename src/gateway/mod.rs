use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod discord;
#[cfg(test)]
pub mod fake;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid bot token")]
    InvalidToken,
    #[error("network error: {0}")]
    Network(String),
    #[error("api error ({code:?}): {message}")]
    Api {
        code: Option<String>,
        message: String,
    },
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<f64> },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Vendor-side identity of an authenticated bot user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
}

impl BotIdentity {
    /// Display handle, `name#1234` or the bare name for the zero discriminator.
    pub fn tag(&self) -> String {
        if self.discriminator.is_empty() || self.discriminator == "0" {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadyInfo {
    pub identity: BotIdentity,
    pub guild_count: i32,
}

#[derive(Debug, Clone)]
pub struct Sender {
    pub id: String,
    pub username: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub enum OptionValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    User(String),
    Channel(String),
    Role(String),
}

impl OptionValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_role(&self) -> Option<&str> {
        match self {
            Self::Role(id) => Some(id),
            _ => None,
        }
    }
}

/// Where a reply should be delivered.
#[derive(Debug, Clone)]
pub enum ReplyTarget {
    Channel(String),
    Interaction { id: String, token: String },
}

#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub name: String,
    pub options: HashMap<String, OptionValue>,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub sender: Sender,
    /// Permission bits the sender holds in the invoking channel.
    pub sender_permissions: u64,
    pub reply: ReplyTarget,
}

impl CommandInvocation {
    pub fn has_permission(&self, bit: u64) -> bool {
        self.sender_permissions & bit != 0
    }
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: Sender,
    pub content: String,
    pub author_permissions: u64,
}

#[derive(Debug, Clone)]
pub struct MemberJoined {
    pub guild_id: String,
    pub user: Sender,
    /// Channel the guild designates for system greetings, when it has one.
    pub system_channel_id: Option<String>,
}

/// Events flowing from a connected bot client to its template dispatcher.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Ready(ReadyInfo),
    Command(CommandInvocation),
    Message(IncomingMessage),
    MemberJoined(MemberJoined),
    Disconnected,
    Errored(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Text,
    Integer,
    Boolean,
    User,
    Channel,
    Role,
}

#[derive(Debug, Clone)]
pub struct CommandOption {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub required: bool,
}

/// One application command as registered with the vendor.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<CommandOption>,
}

impl CommandSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            options: Vec::new(),
        }
    }

    pub fn option(
        mut self,
        name: &'static str,
        description: &'static str,
        kind: OptionKind,
        required: bool,
    ) -> Self {
        self.options.push(CommandOption {
            name,
            description,
            kind,
            required,
        });
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline: Some(inline),
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
    pub member_count: Option<i64>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub user: Sender,
    pub nick: Option<String>,
    pub joined_at: Option<String>,
    pub roles: Vec<String>,
}

/// Entry point to the chat vendor. One per process.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    /// Checks a bot token against the vendor without connecting.
    /// Authentication rejections map to [`GatewayError::InvalidToken`].
    async fn validate_credential(&self, token: &str) -> Result<BotIdentity, GatewayError>;

    /// Builds a client for the token. The client is inert until
    /// [`ChatClient::open`] is called, so callers can attach template
    /// dispatchers before any event is emitted.
    async fn connect(
        &self,
        token: &str,
        intents: u64,
    ) -> Result<Arc<dyn ChatClient>, GatewayError>;
}

/// A live connection acting as one bot.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// Authenticates and starts the event flow. Emits `Ready` to
    /// subscribers and returns the same info to the caller.
    async fn open(&self) -> Result<ReadyInfo, GatewayError>;

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent>;

    fn identity(&self) -> Option<BotIdentity>;

    fn guild_count(&self) -> i32;

    async fn register_commands(&self, commands: &[CommandSpec]) -> Result<(), GatewayError>;

    async fn set_presence(&self, activity: &str) -> Result<(), GatewayError>;

    async fn update_description(&self, description: &str) -> Result<(), GatewayError>;

    /// Posts to a channel, returning the new message id.
    async fn send(&self, channel_id: &str, message: &OutboundMessage)
        -> Result<String, GatewayError>;

    async fn reply(
        &self,
        target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<(), GatewayError>;

    async fn kick(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn timeout(
        &self,
        guild_id: &str,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Deletes up to `count` recent messages in a channel, returning how
    /// many were removed.
    async fn bulk_delete(&self, channel_id: &str, count: u8) -> Result<u8, GatewayError>;

    async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, GatewayError>;

    async fn member_info(&self, guild_id: &str, user_id: &str)
        -> Result<MemberInfo, GatewayError>;

    async fn react(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), GatewayError>;

    async fn add_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError>;

    async fn remove_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError>;

    async fn disconnect(&self);
}

/// Discord permission flag bits.
pub mod permissions {
    pub const KICK_MEMBERS: u64 = 1 << 1;
    pub const BAN_MEMBERS: u64 = 1 << 2;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const SEND_MESSAGES: u64 = 1 << 11;
    pub const MANAGE_MESSAGES: u64 = 1 << 13;
    pub const READ_MESSAGE_HISTORY: u64 = 1 << 16;
    pub const CONNECT: u64 = 1 << 20;
    pub const SPEAK: u64 = 1 << 21;
    pub const MANAGE_ROLES: u64 = 1 << 28;
    pub const CREATE_PUBLIC_THREADS: u64 = 1 << 35;
    pub const MODERATE_MEMBERS: u64 = 1 << 40;

    pub const BASE: u64 = SEND_MESSAGES | READ_MESSAGE_HISTORY | VIEW_CHANNEL;
}

/// Discord gateway intent bits.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MEMBERS: u64 = 1 << 1;
    pub const GUILD_MODERATION: u64 = 1 << 2;
    pub const GUILD_VOICE_STATES: u64 = 1 << 7;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Intent set every managed bot connects with.
    pub const MANAGED_BOT: u64 = GUILDS
        | GUILD_MESSAGES
        | MESSAGE_CONTENT
        | GUILD_MEMBERS
        | GUILD_MODERATION
        | GUILD_VOICE_STATES;
}

/// OAuth2 install URL for a bot with the given permission mask.
pub fn invite_url(client_id: &str, permissions: u64) -> String {
    format!(
        "https://discord.com/api/oauth2/authorize?client_id={}&permissions={}&scope=bot%20applications.commands",
        client_id, permissions
    )
}
