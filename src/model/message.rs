use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Snowflake, User};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A message sent in a channel.
pub struct Message {
    pub id: Snowflake,

    pub channel_id: Snowflake,

    /// Absent for messages in private channels.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    pub author: User,

    #[serde(default)]
    pub content: String,

    /// ISO8601 timestamp
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub edited_timestamp: Option<String>,

    #[serde(default)]
    pub tts: bool,

    #[serde(default)]
    pub mention_everyone: bool,

    #[serde(default)]
    pub mentions: Vec<User>,

    #[serde(default)]
    pub mention_roles: Vec<Snowflake>,

    #[serde(default)]
    pub attachments: Vec<Value>,

    #[serde(default)]
    pub embeds: Vec<Value>,

    #[serde(default)]
    pub reactions: Vec<Value>,

    #[serde(default)]
    pub nonce: Option<Value>,

    #[serde(default)]
    pub pinned: bool,

    /// 0 for a default message, other values are system messages (joins, pins, boosts..)
    #[serde(rename = "type", default)]
    pub kind: u8,
}

impl Message {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    /// Merges a MESSAGE_UPDATE payload, which only carries the fields that changed.
    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.content, raw, "content");
        patch(&mut self.edited_timestamp, raw, "edited_timestamp");
        patch(&mut self.mention_everyone, raw, "mention_everyone");
        patch(&mut self.mentions, raw, "mentions");
        patch(&mut self.mention_roles, raw, "mention_roles");
        patch(&mut self.attachments, raw, "attachments");
        patch(&mut self.embeds, raw, "embeds");
        patch(&mut self.pinned, raw, "pinned");
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// The most recent messages of a channel.
/// Holds at most `limit` messages, inserting past that evicts the oldest one.
pub struct MessageCache {
    limit: usize,
    order: VecDeque<Snowflake>,
    messages: HashMap<Snowflake, Message>,
}

impl MessageCache {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            order: VecDeque::with_capacity(limit.min(128)),
            messages: HashMap::new(),
        }
    }

    /// Stores a message, returning the evicted message if the cache was full.
    /// A message which is already cached is replaced without changing its age.
    pub fn insert(&mut self, message: Message) -> Option<Message> {
        if self.limit == 0 {
            return None;
        }

        let id = message.id;
        if self.messages.insert(id, message).is_some() {
            return None;
        }
        self.order.push_back(id);

        if self.order.len() > self.limit {
            let oldest = self.order.pop_front()?;
            return self.messages.remove(&oldest);
        }

        None
    }

    pub fn get(&self, id: Snowflake) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn get_mut(&mut self, id: Snowflake) -> Option<&mut Message> {
        self.messages.get_mut(&id)
    }

    pub fn remove(&mut self, id: Snowflake) -> Option<Message> {
        let message = self.messages.remove(&id)?;
        self.order.retain(|cached| *cached != id);
        Some(message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Cached messages from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|id| self.messages.get(id))
    }
}
