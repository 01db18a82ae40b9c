use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info};
use tokio::sync::broadcast::error::RecvError;

use super::{colors, GENERIC_ERROR_REPLY};
use crate::gateway::{
    permissions, ChatClient, ChatEvent, CommandInvocation, CommandSpec, Embed, GatewayError,
    IncomingMessage, OptionKind, OutboundMessage,
};

const SPAM_WINDOW: Duration = Duration::from_secs(10);
const SPAM_THRESHOLD: u32 = 5;
const SPAM_TIMEOUT_SECS: i64 = 60;

fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("warn", "Warn a user")
            .option("user", "User to warn", OptionKind::User, true)
            .option("reason", "Reason for warning", OptionKind::Text, false),
        CommandSpec::new("kick", "Kick a user")
            .option("user", "User to kick", OptionKind::User, true)
            .option("reason", "Reason for kick", OptionKind::Text, false),
        CommandSpec::new("ban", "Ban a user")
            .option("user", "User to ban", OptionKind::User, true)
            .option("reason", "Reason for ban", OptionKind::Text, false),
        CommandSpec::new("purge", "Delete multiple messages").option(
            "amount",
            "Number of messages to delete (1-100)",
            OptionKind::Integer,
            true,
        ),
    ]
}

pub fn install(client: Arc<dyn ChatClient>, config: &serde_json::Value) {
    let prefix = config
        .get("prefix")
        .and_then(|v| v.as_str())
        .unwrap_or("!")
        .to_string();
    let mut events = client.subscribe();
    tokio::spawn(async move {
        let mut spam = SpamTracker::new();
        loop {
            match events.recv().await {
                Ok(ChatEvent::Ready(_)) => {
                    info!("Registering moderation commands");
                    if let Err(e) = client.register_commands(&commands()).await {
                        error!("Error registering commands: {}", e);
                    }
                }
                Ok(ChatEvent::Command(invocation)) => {
                    if let Err(e) = handle_command(client.as_ref(), &invocation).await {
                        error!("Moderation command error: {}", e);
                        let _ = client
                            .reply(
                                &invocation.reply,
                                &OutboundMessage::text(GENERIC_ERROR_REPLY),
                            )
                            .await;
                    }
                }
                Ok(ChatEvent::Message(message)) => {
                    handle_message(client.as_ref(), &prefix, &mut spam, &message).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn case_embed(title: &str, color: u32, user_id: &str, moderator: &str, reason: &str) -> Embed {
    Embed::new()
        .color(color)
        .title(title)
        .field("User", format!("<@{}> ({})", user_id, user_id), true)
        .field("Moderator", moderator, true)
        .field("Reason", reason, false)
}

async fn handle_command(
    client: &dyn ChatClient,
    invocation: &CommandInvocation,
) -> Result<(), GatewayError> {
    match invocation.name.as_str() {
        "warn" => {
            if !invocation.has_permission(permissions::MODERATE_MEMBERS) {
                return deny(client, invocation, "Moderate Members").await;
            }
            let Some(user_id) = invocation.options.get("user").and_then(|o| o.as_user()) else {
                return Ok(());
            };
            let reason = invocation
                .options
                .get("reason")
                .and_then(|o| o.as_text())
                .unwrap_or("No reason provided");
            let embed = case_embed(
                "⚠️ User Warned",
                colors::YELLOW,
                user_id,
                &invocation.sender.username,
                reason,
            );
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "kick" => {
            if !invocation.has_permission(permissions::KICK_MEMBERS) {
                return deny(client, invocation, "Kick Members").await;
            }
            let Some(guild_id) = invocation.guild_id.as_deref() else {
                return Ok(());
            };
            let Some(user_id) = invocation.options.get("user").and_then(|o| o.as_user()) else {
                return Ok(());
            };
            let reason = invocation
                .options
                .get("reason")
                .and_then(|o| o.as_text())
                .unwrap_or("No reason provided");
            client.kick(guild_id, user_id, Some(reason)).await?;
            let embed = case_embed(
                "👢 User Kicked",
                colors::RED,
                user_id,
                &invocation.sender.username,
                reason,
            );
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "ban" => {
            if !invocation.has_permission(permissions::BAN_MEMBERS) {
                return deny(client, invocation, "Ban Members").await;
            }
            let Some(guild_id) = invocation.guild_id.as_deref() else {
                return Ok(());
            };
            let Some(user_id) = invocation.options.get("user").and_then(|o| o.as_user()) else {
                return Ok(());
            };
            let reason = invocation
                .options
                .get("reason")
                .and_then(|o| o.as_text())
                .unwrap_or("No reason provided");
            client.ban(guild_id, user_id, Some(reason)).await?;
            let embed = case_embed(
                "🔨 User Banned",
                colors::RED,
                user_id,
                &invocation.sender.username,
                reason,
            );
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "purge" => {
            if !invocation.has_permission(permissions::MANAGE_MESSAGES) {
                return deny(client, invocation, "Manage Messages").await;
            }
            let amount = invocation
                .options
                .get("amount")
                .and_then(|o| o.as_integer())
                .unwrap_or(0);
            if !(1..=100).contains(&amount) {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text("Please provide a number between 1 and 100."),
                    )
                    .await;
            }
            let deleted = client
                .bulk_delete(&invocation.channel_id, amount as u8)
                .await?;
            client
                .reply(
                    &invocation.reply,
                    &OutboundMessage::text(format!("Successfully deleted {} messages.", deleted)),
                )
                .await
        }
        _ => Ok(()),
    }
}

async fn deny(
    client: &dyn ChatClient,
    invocation: &CommandInvocation,
    permission: &str,
) -> Result<(), GatewayError> {
    client
        .reply(
            &invocation.reply,
            &OutboundMessage::text(format!(
                "You need {} permission to use this command.",
                permission
            )),
        )
        .await
}

async fn handle_message(
    client: &dyn ChatClient,
    prefix: &str,
    spam: &mut SpamTracker,
    message: &IncomingMessage,
) {
    if message.author.is_bot {
        return;
    }
    let Some(guild_id) = message.guild_id.as_deref() else {
        return;
    };

    if message.content.starts_with(prefix) {
        if let Err(e) = handle_prefix_command(client, prefix, message).await {
            error!("Prefix command error: {}", e);
            let _ = client
                .send(
                    &message.channel_id,
                    &OutboundMessage::text(GENERIC_ERROR_REPLY),
                )
                .await;
        }
    }

    if spam.record(&message.author.id, Instant::now()) {
        let until = Utc::now() + chrono::Duration::seconds(SPAM_TIMEOUT_SECS);
        match client.timeout(guild_id, &message.author.id, until).await {
            Ok(()) => {
                let embed = Embed::new()
                    .color(colors::YELLOW)
                    .title("🚨 Auto-Moderation Action")
                    .description(format!(
                        "{} has been timed out for 1 minute due to spam detection.",
                        message.author.username
                    ));
                let _ = client
                    .send(&message.channel_id, &OutboundMessage::embed(embed))
                    .await;
            }
            Err(e) => error!("Auto-moderation error: {}", e),
        }
    }
}

async fn handle_prefix_command(
    client: &dyn ChatClient,
    prefix: &str,
    message: &IncomingMessage,
) -> Result<(), GatewayError> {
    let body = message.content[prefix.len()..].trim();
    let mut args = body.split_whitespace();
    let Some(command) = args.next().map(|c| c.to_lowercase()) else {
        return Ok(());
    };
    let args: Vec<&str> = args.collect();
    let guild_id = message.guild_id.as_deref().unwrap_or_default();
    let channel_id = &message.channel_id;

    match command.as_str() {
        "warn" => {
            if message.author_permissions & permissions::MODERATE_MEMBERS == 0 {
                return send_text(
                    client,
                    channel_id,
                    "You need Moderate Members permission to use this command.",
                )
                .await;
            }
            let Some(mention) = args.first() else {
                return send_text(
                    client,
                    channel_id,
                    &format!(
                        "Please mention a user to warn. Usage: `{}warn @user [reason]`",
                        prefix
                    ),
                )
                .await;
            };
            let user_id = parse_mention(mention);
            let reason = join_or_default(&args[1..]);
            let embed = case_embed(
                "⚠️ User Warned",
                colors::YELLOW,
                &user_id,
                &message.author.username,
                &reason,
            );
            client
                .send(channel_id, &OutboundMessage::embed(embed))
                .await?;
            Ok(())
        }
        "kick" => {
            if message.author_permissions & permissions::KICK_MEMBERS == 0 {
                return send_text(
                    client,
                    channel_id,
                    "You need Kick Members permission to use this command.",
                )
                .await;
            }
            let Some(mention) = args.first() else {
                return send_text(
                    client,
                    channel_id,
                    &format!(
                        "Please mention a user to kick. Usage: `{}kick @user [reason]`",
                        prefix
                    ),
                )
                .await;
            };
            let user_id = parse_mention(mention);
            let reason = join_or_default(&args[1..]);
            client.kick(guild_id, &user_id, Some(&reason)).await?;
            let embed = case_embed(
                "👢 User Kicked",
                colors::RED,
                &user_id,
                &message.author.username,
                &reason,
            );
            client
                .send(channel_id, &OutboundMessage::embed(embed))
                .await?;
            Ok(())
        }
        "ban" => {
            if message.author_permissions & permissions::BAN_MEMBERS == 0 {
                return send_text(
                    client,
                    channel_id,
                    "You need Ban Members permission to use this command.",
                )
                .await;
            }
            let Some(mention) = args.first() else {
                return send_text(
                    client,
                    channel_id,
                    &format!(
                        "Please mention a user to ban. Usage: `{}ban @user [reason]`",
                        prefix
                    ),
                )
                .await;
            };
            let user_id = parse_mention(mention);
            let reason = join_or_default(&args[1..]);
            client.ban(guild_id, &user_id, Some(&reason)).await?;
            let embed = case_embed(
                "🔨 User Banned",
                colors::RED,
                &user_id,
                &message.author.username,
                &reason,
            );
            client
                .send(channel_id, &OutboundMessage::embed(embed))
                .await?;
            Ok(())
        }
        "purge" => {
            if message.author_permissions & permissions::MANAGE_MESSAGES == 0 {
                return send_text(
                    client,
                    channel_id,
                    "You need Manage Messages permission to use this command.",
                )
                .await;
            }
            let amount: i64 = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
            if !(1..=100).contains(&amount) {
                return send_text(
                    client,
                    channel_id,
                    &format!(
                        "Please provide a number between 1 and 100. Usage: `{}purge <amount>`",
                        prefix
                    ),
                )
                .await;
            }
            // One extra to cover the command message itself.
            let deleted = client
                .bulk_delete(channel_id, (amount as u8).saturating_add(1))
                .await?;
            send_text(
                client,
                channel_id,
                &format!(
                    "Successfully deleted {} messages.",
                    deleted.saturating_sub(1)
                ),
            )
            .await
        }
        "help" => {
            let embed = Embed::new()
                .color(colors::BLURPLE)
                .title("🛡️ Moderation Bot Commands")
                .description("Available moderation commands:")
                .field(format!("{}warn @user [reason]", prefix), "Warn a user", false)
                .field(
                    format!("{}kick @user [reason]", prefix),
                    "Kick a user from the server",
                    false,
                )
                .field(
                    format!("{}ban @user [reason]", prefix),
                    "Ban a user from the server",
                    false,
                )
                .field(
                    format!("{}purge <amount>", prefix),
                    "Delete multiple messages (1-100)",
                    false,
                )
                .field(
                    "Slash Commands",
                    "You can also use `/warn`, `/kick`, `/ban`, `/purge` slash commands",
                    false,
                )
                .footer("Use slash commands (/) for a better experience!");
            client
                .send(channel_id, &OutboundMessage::embed(embed))
                .await?;
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn send_text(
    client: &dyn ChatClient,
    channel_id: &str,
    text: &str,
) -> Result<(), GatewayError> {
    client.send(channel_id, &OutboundMessage::text(text)).await?;
    Ok(())
}

fn parse_mention(raw: &str) -> String {
    raw.chars().filter(|c| !"<@!>".contains(*c)).collect()
}

fn join_or_default(args: &[&str]) -> String {
    if args.is_empty() {
        "No reason provided".to_string()
    } else {
        args.join(" ")
    }
}

/// Fixed-window message counter behind auto-moderation.
pub struct SpamTracker {
    counts: HashMap<String, (u32, Instant)>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Records one message and reports whether the sender just crossed
    /// the spam threshold. A trigger clears the sender's counter.
    pub fn record(&mut self, user_id: &str, now: Instant) -> bool {
        let entry = self
            .counts
            .entry(user_id.to_string())
            .or_insert((0, now));
        if now.duration_since(entry.1) > SPAM_WINDOW {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now;
        if entry.0 > SPAM_THRESHOLD {
            self.counts.remove(user_id);
            true
        } else {
            false
        }
    }
}

impl Default for SpamTracker {
    fn default() -> Self {
        Self::new()
    }
}
