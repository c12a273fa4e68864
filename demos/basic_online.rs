//! Example showing most basic bot functionality of coming online & reacting to events.
//! Run with `DISCORD_TOKEN=... cargo run --example basic_online`, `RUST_LOG=debug` shows what the library is doing.

use tonsoe_harmony::bot::*;
use tonsoe_harmony::events::Event;
use tonsoe_harmony::model::Snowflake;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> tonsoe_harmony::Result<()> {

    // The library only emits tracing events, printing them is up to the application.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Grab the token from https://discord.com/developers & export it as DISCORD_TOKEN
    let mut bot = Bot::from_env()?;

    // Set any intents you wish by creating an Intents and utilising the set_intents method.
    let bot_intents = Intents::GUILDS | Intents::DIRECT_MESSAGES | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;

    // Set the intents given by bot_intents to be true
    bot.set_intents(bot_intents, true);

    // Execute the bot.
    let client = bot.elevate().await?;
    let mut events = client.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Fell behind on events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match event.event {
                    Event::Ready => tracing::info!("Every shard is online"),
                    Event::GuildCreate(guild) => tracing::info!(shard = event.shard_id, guild = %guild.name, "Joined guild"),
                    Event::MessageCreate(message) if message.content == "!ping" => {
                        let channel_id: Snowflake = message.channel_id;
                        client.rest().create_message(channel_id, "pong".into(), Vec::new()).await?;
                    }
                    _ => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                client.shutdown();
                break;
            }
        }
    }

    client.closed().await
}
