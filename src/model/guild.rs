use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::{patch, Channel, Emoji, Member, Presence, Role, Snowflake, VoiceState};

#[derive(Clone, Debug, PartialEq)]
/// A guild together with everything the gateway told us about it.
pub struct Guild {
    pub id: Snowflake,

    pub name: String,

    /// The shard which delivered this guild, every event for the guild arrives on the same shard.
    pub shard_id: u32,

    /// `false` while the guild is part of an outage.
    pub available: bool,

    pub owner_id: Option<Snowflake>,
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub splash: Option<String>,
    pub description: Option<String>,
    pub preferred_locale: Option<String>,
    pub afk_channel_id: Option<Snowflake>,
    pub afk_timeout: Option<u32>,
    pub system_channel_id: Option<Snowflake>,
    pub verification_level: Option<u8>,
    pub explicit_content_filter: Option<u8>,
    pub mfa_level: Option<u8>,
    pub premium_tier: Option<u8>,
    pub premium_subscription_count: Option<u32>,
    pub vanity_url_code: Option<String>,
    pub features: Vec<String>,
    pub member_count: Option<u64>,
    pub max_members: Option<u64>,

    pub channels: HashMap<Snowflake, Channel>,
    pub members: HashMap<Snowflake, Member>,
    pub roles: HashMap<Snowflake, Role>,
    pub emojis: HashMap<Snowflake, Emoji>,
}

impl Guild {

    /// Materializes a GUILD_CREATE payload delivered by `shard_id`.
    /// Presences & voice states are attached to the members they belong to.
    pub fn create(raw: &Value, shard_id: u32, message_limit: usize) -> serde_json::Result<Self> {
        let id = Snowflake::deserialize_from(raw, "id")?;

        let mut guild = Self {
            id,
            name: String::new(),
            shard_id,
            available: true,
            owner_id: None,
            icon: None,
            banner: None,
            splash: None,
            description: None,
            preferred_locale: None,
            afk_channel_id: None,
            afk_timeout: None,
            system_channel_id: None,
            verification_level: None,
            explicit_content_filter: None,
            mfa_level: None,
            premium_tier: None,
            premium_subscription_count: None,
            vanity_url_code: None,
            features: Vec::new(),
            member_count: None,
            max_members: None,
            channels: HashMap::new(),
            members: HashMap::new(),
            roles: HashMap::new(),
            emojis: HashMap::new(),
        };

        for raw_channel in array(raw, "channels") {
            let mut channel = Channel::create(raw_channel, message_limit)?;
            // Channels inside of GUILD_CREATE don't carry their guild id
            channel.guild_id = Some(id);
            guild.channels.insert(channel.id, channel);
        }

        for raw_role in array(raw, "roles") {
            let role = Role::create(raw_role)?;
            guild.roles.insert(role.id, role);
        }

        guild.replace_emojis(array(raw, "emojis"))?;

        for raw_member in array(raw, "members") {
            let member = Member::create(raw_member)?;
            guild.members.insert(member.id(), member);
        }

        for raw_presence in array(raw, "presences") {
            let user_id = match raw_presence.get("user").map(|user| Snowflake::deserialize_from(user, "id")) {
                Some(Ok(user_id)) => user_id,
                _ => continue,
            };
            match guild.members.get_mut(&user_id) {
                Some(member) => member.presence = Some(Presence::create(raw_presence)?),
                None => debug!(guild = %id, user = %user_id, "Presence for a member which is not cached"),
            }
        }

        for raw_voice_state in array(raw, "voice_states") {
            let voice_state = VoiceState::create(raw_voice_state)?;
            if let Some(member) = guild.members.get_mut(&voice_state.user_id) {
                member.voice_state = Some(voice_state);
            }
        }

        guild.update(raw);
        Ok(guild)
    }

    /// Merges a GUILD_UPDATE payload. Collections are only changed by their own events.
    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.name, raw, "name");
        patch(&mut self.owner_id, raw, "owner_id");
        patch(&mut self.icon, raw, "icon");
        patch(&mut self.banner, raw, "banner");
        patch(&mut self.splash, raw, "splash");
        patch(&mut self.description, raw, "description");
        patch(&mut self.preferred_locale, raw, "preferred_locale");
        patch(&mut self.afk_channel_id, raw, "afk_channel_id");
        patch(&mut self.afk_timeout, raw, "afk_timeout");
        patch(&mut self.system_channel_id, raw, "system_channel_id");
        patch(&mut self.verification_level, raw, "verification_level");
        patch(&mut self.explicit_content_filter, raw, "explicit_content_filter");
        patch(&mut self.mfa_level, raw, "mfa_level");
        patch(&mut self.premium_tier, raw, "premium_tier");
        patch(&mut self.premium_subscription_count, raw, "premium_subscription_count");
        patch(&mut self.vanity_url_code, raw, "vanity_url_code");
        patch(&mut self.features, raw, "features");
        patch(&mut self.member_count, raw, "member_count");
        patch(&mut self.max_members, raw, "max_members");

        if let Some(unavailable) = raw.get("unavailable").and_then(Value::as_bool) {
            self.available = !unavailable;
        }
    }

    /// Replaces every emoji of this guild, returning the previous ones.
    pub fn replace_emojis<'a>(&mut self, raw_emojis: impl IntoIterator<Item = &'a Value>) -> serde_json::Result<HashMap<Snowflake, Emoji>> {
        let mut emojis = HashMap::new();
        for raw_emoji in raw_emojis {
            let emoji = Emoji::create(raw_emoji)?;
            emojis.insert(emoji.id, emoji);
        }
        Ok(std::mem::replace(&mut self.emojis, emojis))
    }

    /// Copy of the guild's own fields with empty collections, used for the `old` side of update events.
    pub fn shallow_clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            shard_id: self.shard_id,
            available: self.available,
            owner_id: self.owner_id,
            icon: self.icon.clone(),
            banner: self.banner.clone(),
            splash: self.splash.clone(),
            description: self.description.clone(),
            preferred_locale: self.preferred_locale.clone(),
            afk_channel_id: self.afk_channel_id,
            afk_timeout: self.afk_timeout,
            system_channel_id: self.system_channel_id,
            verification_level: self.verification_level,
            explicit_content_filter: self.explicit_content_filter,
            mfa_level: self.mfa_level,
            premium_tier: self.premium_tier,
            premium_subscription_count: self.premium_subscription_count,
            vanity_url_code: self.vanity_url_code.clone(),
            features: self.features.clone(),
            member_count: self.member_count,
            max_members: self.max_members,
            channels: HashMap::new(),
            members: HashMap::new(),
            roles: HashMap::new(),
            emojis: HashMap::new(),
        }
    }
}

/// Elements of the array at `raw[key]`, nothing if the key is missing or not an array.
fn array<'a>(raw: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    raw.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}
