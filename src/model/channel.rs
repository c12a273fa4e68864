use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{patch, MessageCache, Snowflake, User};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
/// The numeric `type` of a channel, which decides what fields it carries.
pub enum ChannelType {
    Text,
    Private,
    Voice,
    Group,
    Category,
    News,
    Store,
    /// A channel type this library does not know about yet.
    Unknown(u8),
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            1 => Self::Private,
            2 => Self::Voice,
            3 => Self::Group,
            4 => Self::Category,
            5 => Self::News,
            6 => Self::Store,
            other => Self::Unknown(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(kind: ChannelType) -> Self {
        match kind {
            ChannelType::Text => 0,
            ChannelType::Private => 1,
            ChannelType::Voice => 2,
            ChannelType::Group => 3,
            ChannelType::Category => 4,
            ChannelType::News => 5,
            ChannelType::Store => 6,
            ChannelType::Unknown(other) => other,
        }
    }
}

impl ChannelType {

    /// Whether messages can be sent in channels of this type.
    pub fn is_text_based(self) -> bool {
        matches!(self, Self::Text | Self::Private | Self::Group | Self::News)
    }

    /// Whether channels of this type live outside of guilds.
    pub fn is_private(self) -> bool {
        matches!(self, Self::Private | Self::Group)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    /// Role or user id
    pub id: Snowflake,

    /// 0 for a role, 1 for a member
    #[serde(rename = "type")]
    pub kind: Value,

    /// Bitfield of allowed permissions
    #[serde(default)]
    pub allow: String,

    /// Bitfield of denied permissions
    #[serde(default)]
    pub deny: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
/// Any kind of channel, guild channels and private channels alike.
/// Fields which don't apply to the channel's [`ChannelType`] stay at their defaults.
pub struct Channel {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: ChannelType,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub position: Option<i64>,

    #[serde(default)]
    pub topic: Option<String>,

    #[serde(default)]
    pub nsfw: bool,

    /// Category the channel is sorted under
    #[serde(default)]
    pub parent_id: Option<Snowflake>,

    #[serde(default)]
    pub last_message_id: Option<Snowflake>,

    #[serde(default)]
    pub last_pin_timestamp: Option<String>,

    /// Slowmode in seconds
    #[serde(default)]
    pub rate_limit_per_user: Option<u32>,

    #[serde(default)]
    pub bitrate: Option<u32>,

    #[serde(default)]
    pub user_limit: Option<u32>,

    /// Users of a private or group channel.
    #[serde(default)]
    pub recipients: Vec<User>,

    #[serde(default)]
    pub owner_id: Option<Snowflake>,

    #[serde(default)]
    pub application_id: Option<Snowflake>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default, deserialize_with = "overwrites_by_id")]
    pub permission_overwrites: HashMap<Snowflake, PermissionOverwrite>,

    /// Recent messages, only for text based channels.
    #[serde(skip)]
    pub messages: Option<MessageCache>,
}

fn overwrites_by_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashMap<Snowflake, PermissionOverwrite>, D::Error> {
    let overwrites = Option::<Vec<PermissionOverwrite>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(overwrites.into_iter().map(|overwrite| (overwrite.id, overwrite)).collect())
}

impl Channel {

    /// Materializes a channel, giving text based channels a message cache holding up to `message_limit` messages.
    pub fn create(raw: &Value, message_limit: usize) -> serde_json::Result<Self> {
        let mut channel = Self::deserialize(raw)?;
        if channel.kind.is_text_based() {
            channel.messages = Some(MessageCache::new(message_limit));
        }
        Ok(channel)
    }

    /// Merges a CHANNEL_UPDATE payload. Cached messages are kept.
    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.kind, raw, "type");
        patch(&mut self.name, raw, "name");
        patch(&mut self.position, raw, "position");
        patch(&mut self.topic, raw, "topic");
        patch(&mut self.nsfw, raw, "nsfw");
        patch(&mut self.parent_id, raw, "parent_id");
        patch(&mut self.last_message_id, raw, "last_message_id");
        patch(&mut self.last_pin_timestamp, raw, "last_pin_timestamp");
        patch(&mut self.rate_limit_per_user, raw, "rate_limit_per_user");
        patch(&mut self.bitrate, raw, "bitrate");
        patch(&mut self.user_limit, raw, "user_limit");
        patch(&mut self.recipients, raw, "recipients");
        patch(&mut self.owner_id, raw, "owner_id");
        patch(&mut self.icon, raw, "icon");

        if let Some(Ok(overwrites)) = raw.get("permission_overwrites").map(overwrites_by_id) {
            self.permission_overwrites = overwrites;
        }

        if !self.kind.is_text_based() {
            self.messages = None;
        }
    }

    /// The other user of a private channel.
    pub fn recipient(&self) -> Option<&User> {
        match self.kind {
            ChannelType::Private => self.recipients.first(),
            _ => None,
        }
    }

    /// Copy of this channel without its cached messages, used for the `old` side of update events.
    pub fn without_messages(&self) -> Self {
        Self {
            messages: None,
            permission_overwrites: self.permission_overwrites.clone(),
            recipients: self.recipients.clone(),
            name: self.name.clone(),
            topic: self.topic.clone(),
            last_pin_timestamp: self.last_pin_timestamp.clone(),
            icon: self.icon.clone(),
            ..*self
        }
    }
}
