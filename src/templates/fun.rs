use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;

use super::{colors, GENERIC_ERROR_REPLY};
use crate::gateway::{
    ChatClient, ChatEvent, CommandInvocation, CommandSpec, Embed, GatewayError, OptionKind,
    OutboundMessage,
};

const EIGHT_BALL_RESPONSES: [&str; 20] = [
    "It is certain",
    "Reply hazy, try again",
    "Don't count on it",
    "It is decidedly so",
    "Ask again later",
    "My reply is no",
    "Without a doubt",
    "Better not tell you now",
    "My sources say no",
    "Yes definitely",
    "Cannot predict now",
    "Outlook not so good",
    "You may rely on it",
    "Concentrate and ask again",
    "Very doubtful",
    "As I see it, yes",
    "Most likely",
    "Outlook good",
    "Yes",
    "Signs point to yes",
];

const JOKES: [&str; 8] = [
    "Why don't scientists trust atoms? Because they make up everything!",
    "Why did the scarecrow win an award? He was outstanding in his field!",
    "Why don't eggs tell jokes? They'd crack each other up!",
    "What do you call a dinosaur that crashes his car? Tyrannosaurus Wrecks!",
    "Why can't a bicycle stand up by itself? It's two tired!",
    "What do you call a sleeping bull? A bulldozer!",
    "How do you organize a space party? You planet!",
    "Why don't programmers like nature? It has too many bugs!",
];

const FACTS: [&str; 8] = [
    "Honey never spoils. Archaeologists have found pots of honey in ancient Egyptian tombs that are over 3,000 years old and still perfectly edible!",
    "A group of flamingos is called a 'flamboyance'.",
    "Octopuses have three hearts and blue blood.",
    "Bananas are berries, but strawberries aren't!",
    "A shrimp's heart is in its head.",
    "Wombat droppings are cube-shaped.",
    "Sea otters hold hands while sleeping to prevent themselves from drifting apart.",
    "A cloud can weigh more than a million pounds!",
];

struct TriviaQuestion {
    question: &'static str,
    options: [&'static str; 4],
    correct: usize,
}

const TRIVIA_QUESTIONS: [TriviaQuestion; 4] = [
    TriviaQuestion {
        question: "What is the largest planet in our solar system?",
        options: ["Jupiter", "Saturn", "Neptune", "Earth"],
        correct: 0,
    },
    TriviaQuestion {
        question: "Which element has the chemical symbol 'Au'?",
        options: ["Silver", "Gold", "Aluminum", "Argon"],
        correct: 1,
    },
    TriviaQuestion {
        question: "What year did the Titanic sink?",
        options: ["1910", "1911", "1912", "1913"],
        correct: 2,
    },
    TriviaQuestion {
        question: "Who painted the Mona Lisa?",
        options: [
            "Vincent van Gogh",
            "Pablo Picasso",
            "Leonardo da Vinci",
            "Michelangelo",
        ],
        correct: 2,
    },
];

const TRIVIA_REACTIONS: [&str; 4] = ["🇦", "🇧", "🇨", "🇩"];
const TRIVIA_WINDOW: Duration = Duration::from_secs(30);

fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("8ball", "Ask the magic 8-ball a question").option(
            "question",
            "Your question",
            OptionKind::Text,
            true,
        ),
        CommandSpec::new("roll", "Roll dice").option(
            "sides",
            "Number of sides (default: 6)",
            OptionKind::Integer,
            false,
        ),
        CommandSpec::new("coinflip", "Flip a coin"),
        CommandSpec::new("joke", "Get a random joke"),
        CommandSpec::new("fact", "Get a random fun fact"),
        CommandSpec::new("trivia", "Start a trivia question"),
        CommandSpec::new("rps", "Play Rock Paper Scissors").option(
            "choice",
            "Your choice (rock, paper, or scissors)",
            OptionKind::Text,
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
                    info!("Registering fun commands");
                    if let Err(e) = client.register_commands(&commands()).await {
                        error!("Error registering commands: {}", e);
                    }
                }
                Ok(ChatEvent::Command(invocation)) => {
                    if let Err(e) = handle_command(client.clone(), &invocation).await {
                        error!("Fun command error: {}", e);
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
    client: Arc<dyn ChatClient>,
    invocation: &CommandInvocation,
) -> Result<(), GatewayError> {
    match invocation.name.as_str() {
        "8ball" => {
            let question = invocation
                .options
                .get("question")
                .and_then(|o| o.as_text())
                .unwrap_or_default();
            let answer = EIGHT_BALL_RESPONSES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("Ask again later");
            let embed = Embed::new()
                .color(colors::BLURPLE)
                .title("🎱 Magic 8-Ball")
                .field("Question", question, false)
                .field("Answer", answer, false);
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "roll" => {
            let sides = invocation
                .options
                .get("sides")
                .and_then(|o| o.as_integer())
                .unwrap_or(6);
            if !(2..=100).contains(&sides) {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text("Please choose between 2 and 100 sides!"),
                    )
                    .await;
            }
            let result = rand::thread_rng().gen_range(1..=sides);
            let embed = Embed::new()
                .color(colors::YELLOW)
                .title("🎲 Dice Roll")
                .description(format!("You rolled a **{}** out of {}!", result, sides));
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "coinflip" => {
            let heads = rand::thread_rng().gen_bool(0.5);
            let (emoji, result) = if heads {
                ("🪙", "Heads")
            } else {
                ("🔄", "Tails")
            };
            let embed = Embed::new()
                .color(colors::GREEN)
                .title(format!("{} Coin Flip", emoji))
                .description(format!("The coin landed on **{}**!", result));
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "joke" => {
            let joke = JOKES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(JOKES[0]);
            let embed = Embed::new()
                .color(colors::YELLOW)
                .title("😂 Random Joke")
                .description(joke);
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "fact" => {
            let fact = FACTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(FACTS[0]);
            let embed = Embed::new()
                .color(colors::BLURPLE)
                .title("🧠 Fun Fact")
                .description(fact);
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        "trivia" => {
            let index = rand::thread_rng().gen_range(0..TRIVIA_QUESTIONS.len());
            let question = &TRIVIA_QUESTIONS[index];
            let mut embed = Embed::new()
                .color(colors::RED)
                .title("🧩 Trivia Time!")
                .description(question.question);
            for (label, option) in ["A", "B", "C", "D"].iter().zip(question.options.iter()) {
                embed = embed.field(*label, *option, true);
            }
            embed = embed.footer("You have 30 seconds to answer!");
            let message_id = client
                .send(&invocation.channel_id, &OutboundMessage::embed(embed))
                .await?;
            for reaction in &TRIVIA_REACTIONS {
                client
                    .react(&invocation.channel_id, &message_id, reaction)
                    .await?;
            }
            let channel_id = invocation.channel_id.clone();
            let answer = question.options[question.correct];
            tokio::spawn(async move {
                tokio::time::sleep(TRIVIA_WINDOW).await;
                let reveal = Embed::new()
                    .color(colors::YELLOW)
                    .title("⏰ Time's Up!")
                    .description(format!("The correct answer was: **{}**", answer));
                if let Err(e) = client
                    .send(&channel_id, &OutboundMessage::embed(reveal))
                    .await
                {
                    error!("Failed to reveal trivia answer: {}", e);
                }
            });
            Ok(())
        }
        "rps" => {
            let user_choice = invocation
                .options
                .get("choice")
                .and_then(|o| o.as_text())
                .unwrap_or_default()
                .to_lowercase();
            if !["rock", "paper", "scissors"].contains(&user_choice.as_str()) {
                return client
                    .reply(
                        &invocation.reply,
                        &OutboundMessage::text("Please choose rock, paper, or scissors!"),
                    )
                    .await;
            }
            let bot_choice = ["rock", "paper", "scissors"]
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("rock");
            let (result, color) = rps_outcome(&user_choice, bot_choice);
            let embed = Embed::new()
                .color(color)
                .title("✂️ Rock Paper Scissors")
                .field(
                    "Your Choice",
                    format!("{} {}", rps_emoji(&user_choice), user_choice),
                    true,
                )
                .field(
                    "My Choice",
                    format!("{} {}", rps_emoji(bot_choice), bot_choice),
                    true,
                )
                .field("Result", result, false);
            client
                .reply(&invocation.reply, &OutboundMessage::embed(embed))
                .await
        }
        _ => Ok(()),
    }
}

fn rps_outcome(user: &str, bot: &str) -> (&'static str, u32) {
    if user == bot {
        ("It's a tie!", colors::YELLOW)
    } else if matches!(
        (user, bot),
        ("rock", "scissors") | ("paper", "rock") | ("scissors", "paper")
    ) {
        ("You win!", colors::GREEN)
    } else {
        ("You lose!", colors::RED)
    }
}

fn rps_emoji(choice: &str) -> &'static str {
    match choice {
        "rock" => "🪨",
        "paper" => "📄",
        _ => "✂️",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{Action, FakeGateway};
    use crate::gateway::{intents, ChatGateway, OptionValue, ReplyTarget, Sender};
    use std::collections::HashMap;

    #[test]
    fn rps_outcome_covers_all_matchups() {
        assert_eq!(rps_outcome("rock", "rock").0, "It's a tie!");
        assert_eq!(rps_outcome("rock", "scissors").0, "You win!");
        assert_eq!(rps_outcome("rock", "paper").0, "You lose!");
        assert_eq!(rps_outcome("paper", "rock").0, "You win!");
        assert_eq!(rps_outcome("scissors", "paper").0, "You win!");
        assert_eq!(rps_outcome("scissors", "rock").0, "You lose!");
    }

    fn invocation(name: &str) -> CommandInvocation {
        CommandInvocation {
            name: name.to_string(),
            options: HashMap::new(),
            channel_id: "chan-1".to_string(),
            guild_id: Some("guild-1".to_string()),
            sender: Sender {
                id: "100".to_string(),
                username: "player".to_string(),
                is_bot: false,
            },
            sender_permissions: 0,
            reply: ReplyTarget::Channel("chan-1".to_string()),
        }
    }

    #[tokio::test]
    async fn roll_rejects_out_of_range_sides() {
        let gateway = FakeGateway::new();
        let client = gateway.connect("tok", intents::MANAGED_BOT).await.unwrap();
        let fake = gateway.last_client().unwrap();

        let mut inv = invocation("roll");
        inv.options
            .insert("sides".to_string(), OptionValue::Integer(1));
        handle_command(client.clone(), &inv).await.unwrap();

        let actions = fake.actions();
        assert!(matches!(actions.as_slice(), [Action::Reply { message }]
            if message.content.as_deref() == Some("Please choose between 2 and 100 sides!")));
    }

    #[tokio::test]
    async fn trivia_posts_question_with_four_reactions() {
        let gateway = FakeGateway::new();
        let client = gateway.connect("tok", intents::MANAGED_BOT).await.unwrap();
        let fake = gateway.last_client().unwrap();

        handle_command(client.clone(), &invocation("trivia"))
            .await
            .unwrap();

        let actions = fake.actions();
        assert_eq!(actions.len(), 5);
        assert!(matches!(&actions[0], Action::Send { message, .. }
            if message.embeds[0].fields.len() == 4));
        assert!(matches!(&actions[1], Action::React { emoji, .. } if emoji == "🇦"));
        assert!(matches!(&actions[4], Action::React { emoji, .. } if emoji == "🇩"));
    }

    #[tokio::test]
    async fn eight_ball_echoes_the_question() {
        let gateway = FakeGateway::new();
        let client = gateway.connect("tok", intents::MANAGED_BOT).await.unwrap();
        let fake = gateway.last_client().unwrap();

        let mut inv = invocation("8ball");
        inv.options.insert(
            "question".to_string(),
            OptionValue::Text("Will it compile?".to_string()),
        );
        handle_command(client.clone(), &inv).await.unwrap();

        let actions = fake.actions();
        assert!(matches!(actions.as_slice(), [Action::Reply { message }]
            if message.embeds[0].fields[0].value == "Will it compile?"));
    }
}
