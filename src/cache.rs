use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{Channel, Guild, Snowflake, User};

/// The cache shared between every shard of a client.
/// Readers take the read lock, only the dispatch path of the shards takes the write lock.
pub type SharedCache = Arc<RwLock<Cache>>;

#[derive(Debug, Default)]
/// Everything the gateway has told the client so far.
/// Filled by create events and pruned by delete events, lives as long as the client does.
pub struct Cache {

    /// Every guild received through GUILD_CREATE, key: guild id
    pub guilds: HashMap<Snowflake, Guild>,

    /// Private & group channels, which don't belong to any guild.
    pub private_channels: HashMap<Snowflake, Channel>,

    /// The current user, set by the first READY received on any shard.
    pub user: Option<User>,

    /// Maximum amount of messages cached per text channel, 0 disables message caching.
    pub message_limit: usize,
}

impl Cache {

    /// Creates an empty [`Cache`] keeping up to `message_limit` messages per channel.
    pub fn new(message_limit: usize) -> Self {
        Self {
            message_limit,
            ..Default::default()
        }
    }

    /// Wraps this cache so it can be shared with the shards.
    pub fn shared(self) -> SharedCache {
        Arc::new(RwLock::new(self))
    }

    pub fn guild(&self, guild_id: Snowflake) -> Option<&Guild> {
        self.guilds.get(&guild_id)
    }

    /// Looks up a channel inside of a guild, or a private channel when there is no guild.
    pub fn channel(&self, guild_id: Option<Snowflake>, channel_id: Snowflake) -> Option<&Channel> {
        match guild_id {
            Some(guild_id) => self.guilds.get(&guild_id)?.channels.get(&channel_id),
            None => self.private_channels.get(&channel_id),
        }
    }

    /// Mutable version of [`Cache::channel`].
    pub fn channel_mut(&mut self, guild_id: Option<Snowflake>, channel_id: Snowflake) -> Option<&mut Channel> {
        match guild_id {
            Some(guild_id) => self.guilds.get_mut(&guild_id)?.channels.get_mut(&channel_id),
            None => self.private_channels.get_mut(&channel_id),
        }
    }
}
