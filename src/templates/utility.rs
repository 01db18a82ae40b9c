use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::broadcast::error::RecvError;

use super::{colors, GENERIC_ERROR_REPLY};
use crate::gateway::{
    permissions, ChatClient, ChatEvent, CommandInvocation, CommandSpec, Embed, GatewayError,
    MemberJoined, OptionKind, OutboundMessage,
};

const POLL_EMOJIS: [&str; 10] = ["1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟"];
const MAX_REMINDER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("serverinfo", "Display information about the server"),
        CommandSpec::new("userinfo", "Display information about a user").option(
            "user",
            "User to get info about",
            OptionKind::User,
            false,
        ),
        CommandSpec::new("poll", "Create a poll")
            .option("question", "Poll question", OptionKind::Text, true)
            .option(
                "options",
                "Poll options separated by commas",
                OptionKind::Text,
                true,
            ),
        CommandSpec::new("remind", "Set a reminder")
            .option("time", "Time (e.g., 5m, 1h, 2d)", OptionKind::Text, true)
            .option("message", "Reminder message", OptionKind::Text, true),
        CommandSpec::new("roleassign", "Assign a role to yourself or another user")
            .option("role", "Role to assign", OptionKind::Role, true)
            .option("user", "User to assign role to", OptionKind::User, false),
    ]
}

pub fn install(client: Arc<dyn ChatClient>, _config: &serde_json::Value) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::Ready(_)) => {
                    info!("Registering utility commands");
                    if let Err(e) = client.register_commands(&commands()).await {
                        error!("Error registering commands: {}", e);
                    }
                }
                Ok(ChatEvent::Command(invocation)) => {
                    if let Err(e) = handle_command(client.clone(), &invocation).await {
                        error!("Utility command error: {}", e);
                        let _ = client
                            .reply(
                                &invocation.reply,
                                &OutboundMessage::text(GENERIC_ERROR_REPLY),
                            )
                            .await;
                    }
                }
                Ok(ChatEvent::MemberJoined(joined)) => {
                    if let Err(e) = welcome(client.as_ref(), &joined).await {
                        error!("Failed to send welcome message: {}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_command(
    client: Arc<dyn ChatClient>,
    invocation: &CommandInvocation,
) -> Result<(), GatewayError> {
    match invocation.name.as_str() {
        "serverinfo" => {
            let Some(guild_id) = invocation.guild_id.as_deref() else {
                return Ok(());
            };
            let guild = client.guild_info(guild_id).await?;
            let mut embed = Embed::new()
                .color(colors::BLURPLE)
                .title(format!("📊 {} Server Information", guild.name));
            if let Some(owner_id) = &guild.owner_id {
                embed = embed.field("Owner", format!("<@{}>", owner_id), true);
            }
            if let Some(member_count) = guild.member_count {
                embed = embed.field("Members", member_count.to_string(), true);
            }
            embed = embed.footer(format!("Server ID: {}", guild.id));
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "userinfo" => {
            let Some(guild_id) = invocation.guild_id.as_deref() else {
                return Ok(());
            };
            let user_id = invocation
                .options
                .get("user")
                .and_then(|o| o.as_user())
                .unwrap_or(&invocation.sender.id);
            let member = client.member_info(guild_id, user_id).await?;
            let roles = if member.roles.is_empty() {
                "None".to_string()
            } else {
                member
                    .roles
                    .iter()
                    .map(|r| format!("<@&{}>", r))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let embed = Embed::new()
                .color(colors::BLURPLE)
                .title(format!("👤 {} User Information", member.user.username))
                .field("Username", &member.user.username, true)
                .field("ID", &member.user.id, true)
                .field("Nickname", member.nick.as_deref().unwrap_or("None"), true)
                .field(
                    "Joined Server",
                    member.joined_at.as_deref().unwrap_or("Unknown"),
                    true,
                )
                .field("Roles", roles, false);
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "poll" => {
            let question = invocation
                .options
                .get("question")
                .and_then(|o| o.as_text())
                .unwrap_or_default();
            let options_raw = invocation
                .options
                .get("options")
                .and_then(|o| o.as_text())
                .unwrap_or_default();
            let poll_options: Vec<&str> = options_raw
                .split(',')
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .take(10)
                .collect();
            if poll_options.len() < 2 {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text(
                            "Please provide at least 2 options separated by commas.",
                        ),
                    )
                    .await;
            }
            let mut embed = Embed::new()
                .color(colors::YELLOW)
                .title("📊 Poll")
                .description(question);
            for (index, option) in poll_options.iter().enumerate() {
                embed = embed.field(
                    format!("{} Option {}", POLL_EMOJIS[index], index + 1),
                    *option,
                    false,
                );
            }
            embed = embed.footer(format!("Poll by {}", invocation.sender.username));
            let message_id = client
                .send(&invocation.channel_id, &OutboundMessage::embed(embed))
                .await?;
            for emoji in POLL_EMOJIS.iter().take(poll_options.len()) {
                client
                    .react(&invocation.channel_id, &message_id, emoji)
                    .await?;
            }
            Ok(())
        }
        "remind" => {
            let time_raw = invocation
                .options
                .get("time")
                .and_then(|o| o.as_text())
                .unwrap_or_default()
                .to_string();
            let text = invocation
                .options
                .get("message")
                .and_then(|o| o.as_text())
                .unwrap_or_default()
                .to_string();
            let Some(delay) = parse_duration(&time_raw) else {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text(
                            "Invalid time format. Use format like: 5m, 1h, 2d",
                        ),
                    )
                    .await;
            };
            if delay > MAX_REMINDER {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text("Reminder cannot be longer than 7 days."),
                    )
                    .await;
            }
            client
                .reply(
                    &invocation.reply,
                    &OutboundMessage::text(format!(
                        "⏰ Reminder set for {} from now: \"{}\"",
                        time_raw, text
                    )),
                )
                .await?;
            let channel_id = invocation.channel_id.clone();
            let mention = format!("<@{}>", invocation.sender.id);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let reminder =
                    OutboundMessage::text(format!("🔔 **Reminder:** {} {}", mention, text));
                if let Err(e) = client.send(&channel_id, &reminder).await {
                    error!("Failed to send reminder: {}", e);
                }
            });
            Ok(())
        }
        "roleassign" => {
            let Some(guild_id) = invocation.guild_id.as_deref() else {
                return Ok(());
            };
            let Some(role_id) = invocation.options.get("role").and_then(|o| o.as_role()) else {
                return Ok(());
            };
            let target = invocation
                .options
                .get("user")
                .and_then(|o| o.as_user())
                .unwrap_or(&invocation.sender.id);
            if target != invocation.sender.id
                && !invocation.has_permission(permissions::MANAGE_ROLES)
            {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text(
                            "You need Manage Roles permission to assign roles to others.",
                        ),
                    )
                    .await;
            }
            let member = client.member_info(guild_id, target).await?;
            let text = if member.roles.iter().any(|r| r == role_id) {
                client.remove_role(guild_id, target, role_id).await?;
                format!("✅ Removed role <@&{}> from <@{}>", role_id, target)
            } else {
                client.add_role(guild_id, target, role_id).await?;
                format!("✅ Added role <@&{}> to <@{}>", role_id, target)
            };
            client
                .reply(&invocation.reply, &OutboundMessage::text(text))
                .await
        }
        _ => Ok(()),
    }
}

async fn welcome(client: &dyn ChatClient, joined: &MemberJoined) -> Result<(), GatewayError> {
    let Some(channel_id) = joined.system_channel_id.as_deref() else {
        return Ok(());
    };
    let guild = client.guild_info(&joined.guild_id).await?;
    let mut embed = Embed::new()
        .color(colors::GREEN)
        .title("👋 Welcome!")
        .description(format!(
            "Welcome to **{}**, <@{}>!",
            guild.name, joined.user.id
        ));
    if let Some(member_count) = guild.member_count {
        embed = embed.field("Member #", member_count.to_string(), true);
    }
    client
        .send(channel_id, &OutboundMessage::embed(embed))
        .await?;
    Ok(())
}

/// Parses durations like `5m`, `1h`, `2d`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let unit = raw.chars().last()?;
    let amount: u64 = raw[..raw.len() - unit.len_utf8()].parse().ok()?;
    let seconds = match unit {
        'm' => amount.checked_mul(60)?,
        'h' => amount.checked_mul(60 * 60)?,
        'd' => amount.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}
