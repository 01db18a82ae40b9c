use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{
    BotIdentity, ChatClient, ChatEvent, ChatGateway, CommandSpec, Embed, GatewayError, GuildInfo,
    MemberInfo, OptionKind, OutboundMessage, ReadyInfo, ReplyTarget, Sender,
};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Discord REST entry point.
pub struct DiscordGateway {
    client: reqwest::Client,
    base_url: String,
}

impl DiscordGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DISCORD_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DiscordGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatGateway for DiscordGateway {
    async fn validate_credential(&self, token: &str) -> Result<BotIdentity, GatewayError> {
        let response = self
            .client
            .get(format!("{}/users/@me", self.base_url))
            .header("Authorization", format!("Bot {}", token))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GatewayError::InvalidToken);
        }
        let response = check_status(response).await?;

        let user: DiscordUser = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        Ok(user.into())
    }

    async fn connect(
        &self,
        token: &str,
        intents: u64,
    ) -> Result<Arc<dyn ChatClient>, GatewayError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(DiscordClient {
            http: self.client.clone(),
            base_url: self.base_url.clone(),
            token: token.to_string(),
            intents,
            events,
            identity: Mutex::new(None),
            guild_count: AtomicI32::new(0),
            open: AtomicBool::new(false),
        }))
    }
}

/// One authenticated bot over Discord REST.
///
/// Outbound actions go straight to the API. Inbound events are fanned
/// out through the broadcast channel; [`DiscordClient::ingest`] is the
/// feed point for an interactions transport.
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    intents: u64,
    events: broadcast::Sender<ChatEvent>,
    identity: Mutex<Option<BotIdentity>>,
    guild_count: AtomicI32,
    open: AtomicBool,
}

impl DiscordClient {
    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn application_id(&self) -> Result<String, GatewayError> {
        self.identity
            .lock()
            .unwrap()
            .as_ref()
            .map(|i| i.id.clone())
            .ok_or(GatewayError::Api {
                code: None,
                message: "client is not open".to_string(),
            })
    }

    /// Pushes a vendor event to subscribers. Dropped silently when no
    /// dispatcher is listening.
    pub fn ingest(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    async fn fetch_guild_count(&self) -> Result<i32, GatewayError> {
        let response = self
            .http
            .get(format!("{}/users/@me/guilds", self.base_url))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let guilds: Vec<PartialGuild> = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        Ok(guilds.len() as i32)
    }
}

#[async_trait::async_trait]
impl ChatClient for DiscordClient {
    async fn open(&self) -> Result<ReadyInfo, GatewayError> {
        debug!("opening client with intent mask {:#x}", self.intents);
        let response = self
            .http
            .get(format!("{}/users/@me", self.base_url))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GatewayError::InvalidToken);
        }
        let response = check_status(response).await?;
        let user: DiscordUser = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        let identity: BotIdentity = user.into();
        let guild_count = self.fetch_guild_count().await?;

        *self.identity.lock().unwrap() = Some(identity.clone());
        self.guild_count.store(guild_count, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);

        let ready = ReadyInfo {
            identity,
            guild_count,
        };
        let _ = self.events.send(ChatEvent::Ready(ready.clone()));
        Ok(ready)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn identity(&self) -> Option<BotIdentity> {
        self.identity.lock().unwrap().clone()
    }

    fn guild_count(&self) -> i32 {
        self.guild_count.load(Ordering::SeqCst)
    }

    async fn register_commands(&self, commands: &[CommandSpec]) -> Result<(), GatewayError> {
        let application_id = self.application_id()?;
        let payload: Vec<CommandPayload> = commands.iter().map(CommandPayload::from).collect();
        let response = self
            .http
            .put(format!(
                "{}/applications/{}/commands",
                self.base_url, application_id
            ))
            .header("Authorization", self.auth())
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn set_presence(&self, _activity: &str) -> Result<(), GatewayError> {
        // Presence lives on a gateway session, which REST does not carry.
        Err(GatewayError::Unsupported(
            "presence requires a gateway session",
        ))
    }

    async fn update_description(&self, description: &str) -> Result<(), GatewayError> {
        let response = self
            .http
            .patch(format!("{}/applications/@me", self.base_url))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "description": description }))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn send(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", self.auth())
            .json(&MessagePayload::from(message))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let created: MessageRef = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        Ok(created.id)
    }

    async fn reply(
        &self,
        target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<(), GatewayError> {
        match target {
            ReplyTarget::Channel(channel_id) => {
                self.send(channel_id, message).await.map(|_| ())
            }
            ReplyTarget::Interaction { id, token } => {
                let callback = InteractionCallback {
                    kind: 4,
                    data: MessagePayload::from(message),
                };
                let response = self
                    .http
                    .post(format!(
                        "{}/interactions/{}/{}/callback",
                        self.base_url, id, token
                    ))
                    .json(&callback)
                    .send()
                    .await
                    .map_err(|e| GatewayError::Network(e.to_string()))?;
                check_status(response).await?;
                Ok(())
            }
        }
    }

    async fn kick(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut request = self
            .http
            .delete(format!(
                "{}/guilds/{}/members/{}",
                self.base_url, guild_id, user_id
            ))
            .header("Authorization", self.auth());
        if let Some(reason) = reason {
            request = request.header("X-Audit-Log-Reason", reason);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut request = self
            .http
            .put(format!(
                "{}/guilds/{}/bans/{}",
                self.base_url, guild_id, user_id
            ))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "delete_message_seconds": 0 }));
        if let Some(reason) = reason {
            request = request.header("X-Audit-Log-Reason", reason);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: &str,
        user_id: &str,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .patch(format!(
                "{}/guilds/{}/members/{}",
                self.base_url, guild_id, user_id
            ))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({
                "communication_disabled_until": until.to_rfc3339_opts(SecondsFormat::Millis, true)
            }))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn bulk_delete(&self, channel_id: &str, count: u8) -> Result<u8, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}/channels/{}/messages?limit={}",
                self.base_url, channel_id, count
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let messages: Vec<MessageRef> = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;

        match messages.len() {
            0 => Ok(0),
            1 => {
                let response = self
                    .http
                    .delete(format!(
                        "{}/channels/{}/messages/{}",
                        self.base_url, channel_id, messages[0].id
                    ))
                    .header("Authorization", self.auth())
                    .send()
                    .await
                    .map_err(|e| GatewayError::Network(e.to_string()))?;
                check_status(response).await?;
                Ok(1)
            }
            n => {
                let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
                let response = self
                    .http
                    .post(format!(
                        "{}/channels/{}/messages/bulk-delete",
                        self.base_url, channel_id
                    ))
                    .header("Authorization", self.auth())
                    .json(&serde_json::json!({ "messages": ids }))
                    .send()
                    .await
                    .map_err(|e| GatewayError::Network(e.to_string()))?;
                check_status(response).await?;
                Ok(n as u8)
            }
        }
    }

    async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}/guilds/{}?with_counts=true",
                self.base_url, guild_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let guild: GuildPayload = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        Ok(GuildInfo {
            id: guild.id,
            name: guild.name,
            member_count: guild.approximate_member_count,
            owner_id: guild.owner_id,
        })
    }

    async fn member_info(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<MemberInfo, GatewayError> {
        let response = self
            .http
            .get(format!(
                "{}/guilds/{}/members/{}",
                self.base_url, guild_id, user_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let member: MemberPayload = response
            .json()
            .await
            .map_err(|e| GatewayError::Api {
                code: None,
                message: e.to_string(),
            })?;
        Ok(MemberInfo {
            user: Sender {
                id: member.user.id,
                username: member.user.username,
                is_bot: member.user.bot,
            },
            nick: member.nick,
            joined_at: member.joined_at,
            roles: member.roles,
        })
    }

    async fn react(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .put(format!(
                "{}/channels/{}/messages/{}/reactions/{}/@me",
                self.base_url,
                channel_id,
                message_id,
                urlencoding::encode(emoji)
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .put(format!(
                "{}/guilds/{}/members/{}/roles/{}",
                self.base_url, guild_id, user_id, role_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .delete(format!(
                "{}/guilds/{}/members/{}/roles/{}",
                self.base_url, guild_id, user_id, role_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ChatEvent::Disconnected);
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return Err(GatewayError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(GatewayError::Api {
            code: Some(status.to_string()),
            message: error_text,
        });
    }

    Ok(response)
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: String,
    #[serde(default)]
    bot: bool,
}

impl From<DiscordUser> for BotIdentity {
    fn from(user: DiscordUser) -> Self {
        BotIdentity {
            id: user.id,
            username: user.username,
            discriminator: user.discriminator,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PartialGuild {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embeds: Option<Vec<Embed>>,
}

impl From<&OutboundMessage> for MessagePayload {
    fn from(message: &OutboundMessage) -> Self {
        Self {
            content: message.content.clone(),
            embeds: if message.embeds.is_empty() {
                None
            } else {
                Some(message.embeds.clone())
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct InteractionCallback {
    #[serde(rename = "type")]
    kind: u8,
    data: MessagePayload,
}

#[derive(Debug, Serialize)]
struct CommandPayload {
    name: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    options: Vec<CommandOptionPayload>,
}

#[derive(Debug, Serialize)]
struct CommandOptionPayload {
    #[serde(rename = "type")]
    kind: u8,
    name: &'static str,
    description: &'static str,
    required: bool,
}

impl From<&CommandSpec> for CommandPayload {
    fn from(spec: &CommandSpec) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            options: spec
                .options
                .iter()
                .map(|o| CommandOptionPayload {
                    kind: match o.kind {
                        OptionKind::Text => 3,
                        OptionKind::Integer => 4,
                        OptionKind::Boolean => 5,
                        OptionKind::User => 6,
                        OptionKind::Channel => 7,
                        OptionKind::Role => 8,
                    },
                    name: o.name,
                    description: o.description,
                    required: o.required,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GuildPayload {
    id: String,
    name: String,
    approximate_member_count: Option<i64>,
    owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    user: DiscordUser,
    nick: Option<String>,
    joined_at: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}
