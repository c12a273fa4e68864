//! ### What is Tonsoe Harmony?
//! Tonsoe Harmony is a discord library created for and in Rust, with a focus on bot development.
//! It keeps a sharded connection to the Discord Gateway, materializes what the gateway sends into a cache
//! and sends requests to the Discord api through a rate limited dispatcher.
//!
//! ```no_run
//! use tonsoe_harmony::bot::{Bot, Intents};
//!
//! # async fn run() -> tonsoe_harmony::error::Result<()> {
//! let mut bot = Bot::from_env()?;
//! bot.set_intents(Intents::GUILDS | Intents::GUILD_MESSAGES, true);
//!
//! let client = bot.elevate().await?;
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("shard {}: {:?}", event.shard_id, event.event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bot;
pub mod cache;
pub mod client;
pub mod error;
pub mod events;
pub mod gateway;
pub mod gateway_structs;
pub mod http;
pub mod model;
pub mod ratelimit;
pub mod rest;
pub mod websocket;

pub use bot::{Bot, Intents, ShardingOption};
pub use client::DiscordClient;
pub use error::{Error, Result};
pub use events::Event;
pub use gateway::{GatewayEvent, ShardHandle, ShardStatus};
pub use rest::RestClient;

/// Url of the Discord api without a version.
pub const BASE_API_URL: &str = "https://discord.com/api";

/// Version of the Discord api & gateway this library speaks.
pub const DISCORD_API_VERSION: u32 = 10;
