use std::sync::Arc;

use log::{error, info};
use tokio::sync::broadcast::error::RecvError;

use super::{colors, GENERIC_ERROR_REPLY};
use crate::gateway::{
    ChatClient, ChatEvent, CommandInvocation, CommandSpec, Embed, GatewayError, OptionKind,
    OutboundMessage,
};

fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("play", "Play a song").option(
            "query",
            "Song name or URL",
            OptionKind::Text,
            true,
        ),
        CommandSpec::new("stop", "Stop the music and clear the queue"),
        CommandSpec::new("skip", "Skip the current song"),
        CommandSpec::new("queue", "Show the current queue"),
        CommandSpec::new("volume", "Set the volume (0-100)").option(
            "level",
            "Volume level",
            OptionKind::Integer,
            true,
        ),
    ]
}

pub fn install(client: Arc<dyn ChatClient>, _config: &serde_json::Value) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::Ready(_)) => {
                    info!("Registering music commands");
                    if let Err(e) = client.register_commands(&commands()).await {
                        error!("Error registering commands: {}", e);
                    }
                }
                Ok(ChatEvent::Command(invocation)) => {
                    if let Err(e) = handle_command(client.as_ref(), &invocation).await {
                        error!("Music command error: {}", e);
                        let _ = client
                            .reply(
                                &invocation.reply,
                                &OutboundMessage::text(GENERIC_ERROR_REPLY),
                            )
                            .await;
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
    client: &dyn ChatClient,
    invocation: &CommandInvocation,
) -> Result<(), GatewayError> {
    let embed = match invocation.name.as_str() {
        "play" => {
            let query = invocation
                .options
                .get("query")
                .and_then(|o| o.as_text())
                .unwrap_or_default();
            Embed::new()
                .color(colors::BLURPLE)
                .title("🎵 Music Feature")
                .description(
                    "Music functionality requires additional setup and external dependencies. \
                     This is a basic template that can be extended with an audio pipeline.",
                )
                .field("Requested Song", query, true)
        }
        "stop" => Embed::new()
            .color(colors::RED)
            .title("⏹️ Music Stopped")
            .description("Music playback stopped and queue cleared."),
        "skip" => Embed::new()
            .color(colors::YELLOW)
            .title("⏭️ Song Skipped")
            .description("Skipped to the next song in the queue."),
        "queue" => Embed::new()
            .color(colors::BLURPLE)
            .title("📃 Music Queue")
            .description("The queue is currently empty. Use `/play` to add songs!"),
        "volume" => {
            let level = invocation
                .options
                .get("level")
                .and_then(|o| o.as_integer())
                .unwrap_or(-1);
            if !(0..=100).contains(&level) {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text("Volume must be between 0 and 100!"),
                    )
                    .await;
            }
            Embed::new()
                .color(colors::GREEN)
                .title("🔊 Volume Changed")
                .description(format!("Volume set to {}%", level))
        }
        _ => return Ok(()),
    };
    client
        .reply(&invocation.reply, &OutboundMessage::embed(embed))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{Action, FakeGateway};
    use crate::gateway::{intents, ChatGateway, OptionValue, ReplyTarget, Sender};
    use std::collections::HashMap;

    fn invocation(name: &str) -> CommandInvocation {
        CommandInvocation {
            name: name.to_string(),
            options: HashMap::new(),
            channel_id: "chan-1".to_string(),
            guild_id: Some("guild-1".to_string()),
            sender: Sender {
                id: "100".to_string(),
                username: "listener".to_string(),
                is_bot: false,
            },
            sender_permissions: 0,
            reply: ReplyTarget::Channel("chan-1".to_string()),
        }
    }

    #[tokio::test]
    async fn volume_outside_range_is_rejected() {
        let gateway = FakeGateway::new();
        let client = gateway.connect("tok", intents::MANAGED_BOT).await.unwrap();
        let fake = gateway.last_client().unwrap();

        let mut inv = invocation("volume");
        inv.options
            .insert("level".to_string(), OptionValue::Integer(150));
        handle_command(client.as_ref(), &inv).await.unwrap();

        let actions = fake.actions();
        assert!(matches!(actions.as_slice(), [Action::Reply { message }]
            if message.content.as_deref() == Some("Volume must be between 0 and 100!")));
    }

    #[tokio::test]
    async fn queue_replies_with_placeholder_embed() {
        let gateway = FakeGateway::new();
        let client = gateway.connect("tok", intents::MANAGED_BOT).await.unwrap();
        let fake = gateway.last_client().unwrap();

        handle_command(client.as_ref(), &invocation("queue"))
            .await
            .unwrap();

        let actions = fake.actions();
        assert!(matches!(actions.as_slice(), [Action::Reply { message }]
            if message.embeds[0].title.as_deref() == Some("📃 Music Queue")));
    }
}
