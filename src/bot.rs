use std::env;

use bitflags;
use tokio::time::Duration;

use crate::client::DiscordClient;
use crate::error::{Error, Result};
use crate::BASE_API_URL;

/// Environment variable holding the bot token.
pub const TOKEN_VAR: &str = "DISCORD_TOKEN";

/// Environment variable forcing a set amount of shards.
pub const SHARDS_VAR: &str = "DISCORD_SHARDS";

/// Environment variable overriding the gateway url returned by the api.
pub const GATEWAY_URL_VAR: &str = "DISCORD_GATEWAY_URL";

#[derive(Clone, Debug)]
/// Basic structure which represents a Bot inside the library
/// Not the same as a discord bot!
pub struct Bot {

    /// The discord token for the bot utilised for connecting & accessing the discord api.
    pub token: String,

    /// [Bitflags which allow for the selection of what gateway events to recieve][https://discord.com/developers/docs/topics/gateway#list-of-intents]
    /// Some are privileged and require being toggled on in the developer page.
    pub intents: Intents,

    /// Enum option which determines if automatic sharding should be used or if shards should be created based on a set amount.
    pub sharding_option: ShardingOption,

    /// Url of the api without the version, e.g. `https://discord.com/api`
    pub api_url: String,

    /// Gateway to connect to instead of the one the api hands out.
    pub gateway_url: Option<String>,

    /// Maximum amount of messages cached per channel, 0 disables the message cache.
    pub message_limit: usize,

    /// Time between a shard becoming ready & the next shard identifying.
    pub identify_delay: Duration,

    /// Time a shard waits before reconnecting after losing its connection.
    pub reconnect_delay: Duration,

    /// How many events a subscriber may fall behind before it starts missing events.
    pub event_capacity: usize,
}

impl Default for Bot {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: Intents::empty(),
            sharding_option: ShardingOption::Automatic,
            api_url: BASE_API_URL.to_owned(),
            gateway_url: None,
            message_limit: 100,
            identify_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

impl Bot {

    /// Create a new [`Bot`] requiring basic fields set at initialisation
    pub fn new(token: String) -> Self {
        Self {
            token,
            intents: Intents::empty(),
            ..Default::default()
        }
    }

    /// Creates a [`Bot`] from `DISCORD_TOKEN`, with `DISCORD_SHARDS` & `DISCORD_GATEWAY_URL` when they are set.
    pub fn from_env() -> Result<Self> {
        let token = env::var(TOKEN_VAR)
            .map_err(|_| Error::Config(format!("{TOKEN_VAR} must be set")))?;

        let mut bot = Self::new(token);

        if let Ok(shards) = env::var(SHARDS_VAR) {
            let amount = shards.trim()
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("{SHARDS_VAR} must be a number, got {shards:?}")))?;
            bot.sharding_option = ShardingOption::SetAmount(amount);
        }

        bot.gateway_url = env::var(GATEWAY_URL_VAR).ok();

        Ok(bot)
    }

    /// Sets the intents of a [`Bot`] to be the union between the existing [`Intents`] in the bot and another [`Intents`]
    pub fn union_intents(&mut self, intents: Intents) {
        self.intents = self.intents.union(intents);
    }

    /// Sets the intents of a [`Bot`] to be the intersection between the existing [`Intents`] in the bot and another [`Intents`]
    pub fn intersection_intents(&mut self, intents: Intents) {
        self.intents = self.intents.intersection(intents);
    }

    /// Inserts or removes the specified [`Intents`] for a [`Bot`] depending on the passed [`Intents`] and the value [`bool`]
    pub fn set_intents(&mut self, intents: Intents, value: bool) {
        self.intents.set(intents, value);
    }

    pub fn set_sharding_option(&mut self, sharding_option: ShardingOption) {
        self.sharding_option = sharding_option;
    }

    pub fn set_message_limit(&mut self, message_limit: usize) {
        self.message_limit = message_limit;
    }

    /// The amount of shards to start, `recommended` is what the api suggested.
    pub fn shard_amount(&self, recommended: u32) -> Result<u32> {
        let amount = match self.sharding_option {

            // Shard amount is set based on the recommended amount from Discord
            ShardingOption::Automatic => recommended,

            // Shard amount is set manually based on what the user desires.
            ShardingOption::SetAmount(amount) => amount,
        };

        if amount == 0 {
            return Err(Error::InvalidShardCount);
        }

        Ok(amount)
    }

    /// Main execution for a [`Bot`] and initialisation of a [`DiscordClient`]
    /// Establish a connection to the Discord Gateway & start listening to the events.
    pub async fn elevate(self) -> Result<DiscordClient> {
        DiscordClient::connect(self).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Enum for the different options available for sharding when the [`Bot`] is ran.
/// Only Shard 0 will recieve DMs,
pub enum ShardingOption {

    /// Automatically sets up sharding based on information about Session Start Limits.
    Automatic,

    /// Force [`Bot`] to utilise a set amount of shards
    SetAmount(u32),
}

bitflags::bitflags! {

    /// [Bitflags Struct which represents all the possible intents for the Gateway Identify handshake event.][https://discord.com/developers/docs/topics/gateway#list-of-intents]
    pub struct Intents: u32 {

        const GUILDS = 1 << 0;

        /// This is a privileged [`Intent`]
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;

        /// This is a privileged [`Intent`]
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// This is a privileged [`Intent`]
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;

    }

}
