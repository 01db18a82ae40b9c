use std::sync::Arc;

use log::warn;

use crate::gateway::{permissions, ChatClient};

pub mod fun;
pub mod moderation;
pub mod music;
pub mod utility;

/// Discord brand palette used by the canned reply embeds.
pub mod colors {
    pub const BLURPLE: u32 = 0x5865F2;
    pub const GREEN: u32 = 0x57F287;
    pub const YELLOW: u32 = 0xFEE75C;
    pub const RED: u32 = 0xED4245;
}

pub const GENERIC_ERROR_REPLY: &str = "An error occurred while executing the command.";

/// Attaches the behavior for `template_id` to a connected client.
/// Unknown ids install nothing; the bot still comes online.
pub fn install(client: Arc<dyn ChatClient>, template_id: &str, config: &serde_json::Value) {
    match template_id {
        "moderation-pro" => moderation::install(client, config),
        "music-master" => music::install(client, config),
        "utility-hub" => utility::install(client, config),
        "fun-zone" => fun::install(client, config),
        other => warn!("Unknown template: {}", other),
    }
}

/// Invite permission mask for a template, matching what its commands use.
pub fn permissions_for(template_id: &str) -> u64 {
    match template_id {
        "moderation-pro" => {
            permissions::BASE
                | permissions::KICK_MEMBERS
                | permissions::BAN_MEMBERS
                | permissions::MANAGE_MESSAGES
                | permissions::MANAGE_ROLES
                | permissions::MODERATE_MEMBERS
        }
        "music-master" => permissions::BASE | permissions::CONNECT | permissions::SPEAK,
        "utility-hub" => {
            permissions::BASE | permissions::MANAGE_ROLES | permissions::CREATE_PUBLIC_THREADS
        }
        _ => permissions::BASE,
    }
}
