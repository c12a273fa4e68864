//! Typed gateway events & the handlers which apply dispatch payloads to the [`Cache`].
//!
//! A handler only ever touches the cache it is handed and returns the event to emit, it never performs I/O.
//! The shard calling it holds the cache's write lock for the whole call, so every handler runs as one atomic step.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::model::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Names of the dispatch events this library understands.
pub enum EventName {
    Ready,
    Resumed,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildEmojisUpdate,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildMemberUpdate,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageDeleteBulk,
    PresenceUpdate,
    VoiceStateUpdate,
}

impl EventName {

    /// Parses the `t` field of a dispatch payload, `None` for events which are not handled.
    pub fn from_wire(name: &str) -> Option<Self> {
        Some(match name {
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "GUILD_EMOJIS_UPDATE" => Self::GuildEmojisUpdate,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_ROLE_CREATE" => Self::GuildRoleCreate,
            "GUILD_ROLE_UPDATE" => Self::GuildRoleUpdate,
            "GUILD_ROLE_DELETE" => Self::GuildRoleDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "MESSAGE_DELETE_BULK" => Self::MessageDeleteBulk,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "VOICE_STATE_UPDATE" => Self::VoiceStateUpdate,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
/// An event emitted to subscribers of a [`crate::client::DiscordClient`].
/// Update events carry the entity after the update together with a copy from before it.
pub enum Event {

    /// A shard finished its handshake for the first time.
    ShardReady,

    /// Every shard of the client is ready.
    Ready,

    /// A shard resumed its previous session after reconnecting.
    Resumed,

    ChannelCreate(Channel),
    ChannelUpdate { channel: Channel, old: Channel },
    ChannelDelete(Channel),

    GuildCreate(Guild),

    /// Both guilds are copies without their collections.
    GuildUpdate { guild: Guild, old: Guild },

    /// `unavailable` is set when the guild is part of an outage instead of having been left.
    GuildDelete { guild_id: Snowflake, guild: Option<Guild>, unavailable: bool },

    GuildEmojisUpdate { guild_id: Snowflake, emojis: HashMap<Snowflake, Emoji>, old: HashMap<Snowflake, Emoji> },

    GuildMemberAdd { guild_id: Snowflake, member: Member },
    GuildMemberRemove { guild_id: Snowflake, user: User, member: Option<Member> },
    GuildMemberUpdate { guild_id: Snowflake, member: Member, old: Option<Member> },

    GuildRoleCreate { guild_id: Snowflake, role: Role },
    GuildRoleUpdate { guild_id: Snowflake, role: Role, old: Option<Role> },
    GuildRoleDelete { guild_id: Snowflake, role_id: Snowflake, role: Option<Role> },

    MessageCreate(Message),

    /// `message` is `None` when the message was not cached and the update was too partial to build one.
    MessageUpdate { id: Snowflake, channel_id: Snowflake, message: Option<Message>, old: Option<Message> },

    MessageDelete { id: Snowflake, channel_id: Snowflake, guild_id: Option<Snowflake>, message: Option<Message> },
    MessageDeleteBulk { ids: Vec<Snowflake>, channel_id: Snowflake, guild_id: Option<Snowflake>, messages: Vec<Message> },

    PresenceUpdate { guild_id: Snowflake, user_id: Snowflake, presence: Presence, old: Option<Presence> },

    VoiceStateUpdate(VoiceState),
}

/// Applies a dispatch payload to the cache and returns the event to emit.
/// Returns `None` when there is nothing to emit, e.g. because the payload refers to a guild which isn't cached.
pub fn handle(cache: &mut Cache, name: EventName, data: &Value, shard_id: u32) -> Option<Event> {
    let result = match name {
        EventName::Ready => ready(cache, data),
        EventName::Resumed => Ok(None),
        EventName::ChannelCreate => channel_create(cache, data),
        EventName::ChannelUpdate => channel_update(cache, data),
        EventName::ChannelDelete => channel_delete(cache, data),
        EventName::GuildCreate => guild_create(cache, data, shard_id),
        EventName::GuildUpdate => guild_update(cache, data),
        EventName::GuildDelete => guild_delete(cache, data),
        EventName::GuildEmojisUpdate => guild_emojis_update(cache, data),
        EventName::GuildMemberAdd => guild_member_add(cache, data),
        EventName::GuildMemberRemove => guild_member_remove(cache, data),
        EventName::GuildMemberUpdate => guild_member_update(cache, data),
        EventName::GuildRoleCreate => guild_role_create(cache, data),
        EventName::GuildRoleUpdate => guild_role_update(cache, data),
        EventName::GuildRoleDelete => guild_role_delete(cache, data),
        EventName::MessageCreate => message_create(cache, data),
        EventName::MessageUpdate => message_update(cache, data),
        EventName::MessageDelete => message_delete(cache, data),
        EventName::MessageDeleteBulk => message_delete_bulk(cache, data),
        EventName::PresenceUpdate => presence_update(cache, data),
        EventName::VoiceStateUpdate => voice_state_update(cache, data),
    };

    match result {
        Ok(event) => event,
        Err(error) => {
            warn!(shard_id, event = ?name, %error, "Failed to materialize dispatch payload");
            None
        }
    }
}

type HandlerResult = serde_json::Result<Option<Event>>;

/// Stand-in for missing nested objects so their fields fail to deserialize with a proper error.
const NULL: &Value = &Value::Null;

fn guild_id(data: &Value) -> serde_json::Result<Snowflake> {
    Snowflake::deserialize_from(data, "guild_id")
}

fn optional_guild_id(data: &Value) -> Option<Snowflake> {
    Snowflake::deserialize_from(data, "guild_id").ok()
}

/// Logs & skips payloads for guilds which were never received.
fn missing_guild(guild_id: Snowflake) -> HandlerResult {
    debug!(guild = %guild_id, "Dispatch for a guild which is not cached");
    Ok(None)
}

fn ready(cache: &mut Cache, data: &Value) -> HandlerResult {
    if cache.user.is_none() {
        if let Some(user) = data.get("user") {
            cache.user = Some(User::create(user)?);
        }
    }
    Ok(None)
}

fn channel_create(cache: &mut Cache, data: &Value) -> HandlerResult {
    let channel = Channel::create(data, cache.message_limit)?;
    let event = Event::ChannelCreate(channel.without_messages());

    match channel.guild_id {
        Some(guild_id) => match cache.guilds.get_mut(&guild_id) {
            Some(guild) => {
                guild.channels.insert(channel.id, channel);
            }
            None => return missing_guild(guild_id),
        },
        None => {
            cache.private_channels.insert(channel.id, channel);
        }
    }

    Ok(Some(event))
}

fn channel_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let channel_id = Snowflake::deserialize_from(data, "id")?;
    let message_limit = cache.message_limit;

    match cache.channel_mut(optional_guild_id(data), channel_id) {
        Some(channel) => {
            let old = channel.without_messages();
            channel.update(data);
            Ok(Some(Event::ChannelUpdate { channel: channel.without_messages(), old }))
        }
        None => {
            // Updates for channels we never saw are treated as a create
            let channel = Channel::create(data, message_limit)?;
            let old = channel.without_messages();
            match channel.guild_id {
                Some(guild_id) => match cache.guilds.get_mut(&guild_id) {
                    Some(guild) => {
                        guild.channels.insert(channel_id, channel.clone());
                    }
                    None => return missing_guild(guild_id),
                },
                None => {
                    cache.private_channels.insert(channel_id, channel.clone());
                }
            }
            Ok(Some(Event::ChannelUpdate { channel: channel.without_messages(), old }))
        }
    }
}

fn channel_delete(cache: &mut Cache, data: &Value) -> HandlerResult {
    let channel_id = Snowflake::deserialize_from(data, "id")?;

    let removed = match optional_guild_id(data) {
        Some(guild_id) => match cache.guilds.get_mut(&guild_id) {
            Some(guild) => guild.channels.remove(&channel_id),
            None => return missing_guild(guild_id),
        },
        None => cache.private_channels.remove(&channel_id),
    };

    let channel = match removed {
        Some(channel) => channel,
        None => Channel::create(data, 0)?,
    };

    Ok(Some(Event::ChannelDelete(channel)))
}

fn guild_create(cache: &mut Cache, data: &Value, shard_id: u32) -> HandlerResult {
    let guild = Guild::create(data, shard_id, cache.message_limit)?;
    cache.guilds.insert(guild.id, guild.clone());
    Ok(Some(Event::GuildCreate(guild)))
}

fn guild_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = Snowflake::deserialize_from(data, "id")?;

    match cache.guilds.get_mut(&guild_id) {
        Some(guild) => {
            let old = guild.shallow_clone();
            guild.update(data);
            Ok(Some(Event::GuildUpdate { guild: guild.shallow_clone(), old }))
        }
        None => missing_guild(guild_id),
    }
}

fn guild_delete(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = Snowflake::deserialize_from(data, "id")?;
    let unavailable = data.get("unavailable").and_then(Value::as_bool).unwrap_or(false);

    let guild = if unavailable {
        cache.guilds.get_mut(&guild_id).map(|guild| {
            guild.available = false;
            guild.shallow_clone()
        })
    } else {
        cache.guilds.remove(&guild_id)
    };

    Ok(Some(Event::GuildDelete { guild_id, guild, unavailable }))
}

fn guild_emojis_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    let raw_emojis = data.get("emojis").and_then(Value::as_array).into_iter().flatten();
    let old = guild.replace_emojis(raw_emojis)?;

    Ok(Some(Event::GuildEmojisUpdate { guild_id, emojis: guild.emojis.clone(), old }))
}

fn guild_member_add(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    let member = Member::create(data)?;
    if guild.members.insert(member.id(), member.clone()).is_none() {
        guild.member_count = guild.member_count.map(|count| count + 1);
    }

    Ok(Some(Event::GuildMemberAdd { guild_id, member }))
}

fn guild_member_remove(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let user = User::create(data.get("user").unwrap_or(NULL))?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    let member = guild.members.remove(&user.id);
    if member.is_some() {
        guild.member_count = guild.member_count.map(|count| count.saturating_sub(1));
    }

    Ok(Some(Event::GuildMemberRemove { guild_id, user, member }))
}

fn guild_member_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let user_id = Snowflake::deserialize_from(data.get("user").unwrap_or(NULL), "id")?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    match guild.members.get_mut(&user_id) {
        Some(member) => {
            let old = member.clone();
            member.update(data);
            Ok(Some(Event::GuildMemberUpdate { guild_id, member: member.clone(), old: Some(old) }))
        }
        None => {
            let member = Member::create(data)?;
            guild.members.insert(user_id, member.clone());
            Ok(Some(Event::GuildMemberUpdate { guild_id, member, old: None }))
        }
    }
}

fn guild_role_create(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let role = Role::create(data.get("role").unwrap_or(NULL))?;
    match cache.guilds.get_mut(&guild_id) {
        Some(guild) => {
            guild.roles.insert(role.id, role.clone());
            Ok(Some(Event::GuildRoleCreate { guild_id, role }))
        }
        None => missing_guild(guild_id),
    }
}

fn guild_role_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let raw_role = data.get("role").unwrap_or(NULL);
    let role_id = Snowflake::deserialize_from(raw_role, "id")?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    match guild.roles.get_mut(&role_id) {
        Some(role) => {
            let old = role.clone();
            role.update(raw_role);
            Ok(Some(Event::GuildRoleUpdate { guild_id, role: role.clone(), old: Some(old) }))
        }
        None => {
            let role = Role::create(raw_role)?;
            guild.roles.insert(role_id, role.clone());
            Ok(Some(Event::GuildRoleUpdate { guild_id, role, old: None }))
        }
    }
}

fn guild_role_delete(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let role_id = Snowflake::deserialize_from(data, "role_id")?;
    match cache.guilds.get_mut(&guild_id) {
        Some(guild) => {
            let role = guild.roles.remove(&role_id);
            Ok(Some(Event::GuildRoleDelete { guild_id, role_id, role }))
        }
        None => missing_guild(guild_id),
    }
}

fn message_create(cache: &mut Cache, data: &Value) -> HandlerResult {
    let message = Message::create(data)?;

    if let Some(channel) = cache.channel_mut(message.guild_id, message.channel_id) {
        channel.last_message_id = Some(message.id);
        if let Some(messages) = channel.messages.as_mut() {
            messages.insert(message.clone());
        }
    }

    Ok(Some(Event::MessageCreate(message)))
}

fn message_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let id = Snowflake::deserialize_from(data, "id")?;
    let channel_id = Snowflake::deserialize_from(data, "channel_id")?;

    let cached = cache
        .channel_mut(optional_guild_id(data), channel_id)
        .and_then(|channel| channel.messages.as_mut())
        .and_then(|messages| messages.get_mut(id));

    let (message, old) = match cached {
        Some(message) => {
            let old = message.clone();
            message.update(data);
            (Some(message.clone()), Some(old))
        }
        None => (Message::create(data).ok(), None),
    };

    Ok(Some(Event::MessageUpdate { id, channel_id, message, old }))
}

fn message_delete(cache: &mut Cache, data: &Value) -> HandlerResult {
    let id = Snowflake::deserialize_from(data, "id")?;
    let channel_id = Snowflake::deserialize_from(data, "channel_id")?;
    let guild_id = optional_guild_id(data);

    let message = cache
        .channel_mut(guild_id, channel_id)
        .and_then(|channel| channel.messages.as_mut())
        .and_then(|messages| messages.remove(id));

    Ok(Some(Event::MessageDelete { id, channel_id, guild_id, message }))
}

fn message_delete_bulk(cache: &mut Cache, data: &Value) -> HandlerResult {
    let ids: Vec<Snowflake> = serde::Deserialize::deserialize(data.get("ids").unwrap_or(NULL))?;
    let channel_id = Snowflake::deserialize_from(data, "channel_id")?;
    let guild_id = optional_guild_id(data);

    let mut messages = Vec::new();
    if let Some(cached) = cache.channel_mut(guild_id, channel_id).and_then(|channel| channel.messages.as_mut()) {
        messages.extend(ids.iter().filter_map(|id| cached.remove(*id)));
    }

    Ok(Some(Event::MessageDeleteBulk { ids, channel_id, guild_id, messages }))
}

fn presence_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let guild_id = guild_id(data)?;
    let user_id = Snowflake::deserialize_from(data.get("user").unwrap_or(NULL), "id")?;
    let guild = match cache.guilds.get_mut(&guild_id) {
        Some(guild) => guild,
        None => return missing_guild(guild_id),
    };

    let member = match guild.members.get_mut(&user_id) {
        Some(member) => member,
        None => {
            debug!(guild = %guild_id, user = %user_id, "Presence for a member which is not cached");
            return Ok(None);
        }
    };

    let old = match member.presence.as_mut() {
        Some(presence) => {
            let old = presence.clone();
            presence.update(data);
            Some(old)
        }
        None => {
            member.presence = Some(Presence::create(data)?);
            None
        }
    };

    let presence = match member.presence.clone() {
        Some(presence) => presence,
        None => return Ok(None),
    };

    Ok(Some(Event::PresenceUpdate { guild_id, user_id, presence, old }))
}

fn voice_state_update(cache: &mut Cache, data: &Value) -> HandlerResult {
    let voice_state = VoiceState::create(data)?;

    if let Some(guild_id) = voice_state.guild_id {
        let member = cache
            .guilds
            .get_mut(&guild_id)
            .and_then(|guild| guild.members.get_mut(&voice_state.user_id));

        if let Some(member) = member {
            member.voice_state = voice_state.channel_id.map(|_| voice_state.clone());
        }
    }

    Ok(Some(Event::VoiceStateUpdate(voice_state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GUILD: u64 = 41771983423143937;
    const CHANNEL: u64 = 41771983423143938;
    const USER: u64 = 80351110224678912;

    fn cache_with_guild(message_limit: usize) -> Cache {
        let mut cache = Cache::new(message_limit);
        let event = handle(&mut cache, EventName::GuildCreate, &json!({
            "id": GUILD.to_string(),
            "name": "test guild",
            "member_count": 1,
            "channels": [{ "id": CHANNEL.to_string(), "type": 0, "name": "general" }],
            "roles": [],
            "emojis": [],
            "members": [{ "user": { "id": USER.to_string(), "username": "Nelly" }, "roles": [] }],
            "presences": [],
            "voice_states": []
        }), 2);
        assert!(matches!(event, Some(Event::GuildCreate(ref guild)) if guild.shard_id == 2));
        cache
    }

    fn message(id: u64) -> Value {
        json!({
            "id": id.to_string(),
            "channel_id": CHANNEL.to_string(),
            "guild_id": GUILD.to_string(),
            "author": { "id": USER.to_string(), "username": "Nelly" },
            "content": format!("message {id}"),
            "timestamp": "2022-01-01T00:00:00+00:00"
        })
    }

    #[test]
    fn wire_names_map_to_handlers() {
        assert_eq!(EventName::from_wire("GUILD_MEMBER_ADD"), Some(EventName::GuildMemberAdd));
        assert_eq!(EventName::from_wire("MESSAGE_REACTION_ADD"), None);
        assert_eq!(EventName::from_wire("guild_member_add"), None);
    }

    #[test]
    fn ready_sets_the_current_user_once() {
        let mut cache = Cache::new(0);
        handle(&mut cache, EventName::Ready, &json!({ "user": { "id": "1", "username": "first" } }), 0);
        handle(&mut cache, EventName::Ready, &json!({ "user": { "id": "1", "username": "second" } }), 1);

        assert_eq!(cache.user.map(|user| user.username), Some(String::from("first")));
    }

    #[test]
    fn member_add_and_remove() {
        let mut cache = cache_with_guild(10);

        let added = handle(&mut cache, EventName::GuildMemberAdd, &json!({
            "guild_id": GUILD.to_string(),
            "user": { "id": "5", "username": "new" },
            "roles": []
        }), 2);
        assert!(matches!(added, Some(Event::GuildMemberAdd { ref member, .. }) if member.user.username == "new"));
        assert_eq!(cache.guilds[&Snowflake(GUILD)].member_count, Some(2));

        let removed = handle(&mut cache, EventName::GuildMemberRemove, &json!({
            "guild_id": GUILD.to_string(),
            "user": { "id": "5", "username": "new" }
        }), 2);
        assert!(matches!(removed, Some(Event::GuildMemberRemove { member: Some(_), .. })));
        assert!(!cache.guilds[&Snowflake(GUILD)].members.contains_key(&Snowflake(5)));
        assert_eq!(cache.guilds[&Snowflake(GUILD)].member_count, Some(1));
    }

    #[test]
    fn applying_an_update_twice_equals_once() {
        let mut cache = cache_with_guild(10);
        let update = json!({
            "guild_id": GUILD.to_string(),
            "user": { "id": USER.to_string(), "username": "Nelly" },
            "nick": "nel",
            "roles": ["9"]
        });

        handle(&mut cache, EventName::GuildMemberUpdate, &update, 2);
        let once = cache.guilds[&Snowflake(GUILD)].members[&Snowflake(USER)].clone();
        let event = handle(&mut cache, EventName::GuildMemberUpdate, &update, 2);
        let twice = &cache.guilds[&Snowflake(GUILD)].members[&Snowflake(USER)];

        assert_eq!(&once, twice);
        assert_eq!(twice.roles, [Snowflake(9)]);
        assert!(matches!(event, Some(Event::GuildMemberUpdate { old: Some(ref old), .. }) if *old == once));
    }

    #[test]
    fn presence_is_created_lazily() {
        let mut cache = cache_with_guild(10);
        let presence = json!({
            "guild_id": GUILD.to_string(),
            "user": { "id": USER.to_string() },
            "status": "online",
            "activities": []
        });

        let first = handle(&mut cache, EventName::PresenceUpdate, &presence, 2);
        assert!(matches!(first, Some(Event::PresenceUpdate { old: None, .. })));

        let second = handle(&mut cache, EventName::PresenceUpdate, &presence, 2);
        assert!(matches!(second, Some(Event::PresenceUpdate { old: Some(_), .. })));

        let unknown_member = handle(&mut cache, EventName::PresenceUpdate, &json!({
            "guild_id": GUILD.to_string(),
            "user": { "id": "12345" },
            "status": "online"
        }), 2);
        assert!(unknown_member.is_none());
    }

    #[test]
    fn messages_are_cached_up_to_the_limit() {
        let mut cache = cache_with_guild(2);
        for id in 1..=3 {
            handle(&mut cache, EventName::MessageCreate, &message(id), 2);
        }

        let channel = cache.channel(Some(Snowflake(GUILD)), Snowflake(CHANNEL)).unwrap();
        let messages = channel.messages.as_ref().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.get(Snowflake(1)).is_none());
        assert_eq!(channel.last_message_id, Some(Snowflake(3)));

        let updated = handle(&mut cache, EventName::MessageUpdate, &json!({
            "id": "3",
            "channel_id": CHANNEL.to_string(),
            "guild_id": GUILD.to_string(),
            "content": "edited"
        }), 2);
        assert!(matches!(updated, Some(Event::MessageUpdate { message: Some(ref message), old: Some(_), .. }) if message.content == "edited"));

        let deleted = handle(&mut cache, EventName::MessageDelete, &json!({
            "id": "3",
            "channel_id": CHANNEL.to_string(),
            "guild_id": GUILD.to_string()
        }), 2);
        assert!(matches!(deleted, Some(Event::MessageDelete { message: Some(_), .. })));
    }

    #[test]
    fn channels_are_created_updated_and_deleted() {
        let mut cache = cache_with_guild(10);

        handle(&mut cache, EventName::ChannelCreate, &json!({ "id": "77", "type": 1, "recipients": [] }), 0);
        assert!(cache.private_channels.contains_key(&Snowflake(77)));

        let updated = handle(&mut cache, EventName::ChannelUpdate, &json!({
            "id": CHANNEL.to_string(),
            "guild_id": GUILD.to_string(),
            "type": 0,
            "topic": "new topic"
        }), 2);
        match updated {
            Some(Event::ChannelUpdate { channel, old }) => {
                assert_eq!(channel.topic.as_deref(), Some("new topic"));
                assert_eq!(channel.name.as_deref(), Some("general"));
                assert_eq!(old.topic, None);
            }
            other => panic!("unexpected event {other:?}"),
        }

        handle(&mut cache, EventName::ChannelDelete, &json!({
            "id": CHANNEL.to_string(),
            "guild_id": GUILD.to_string(),
            "type": 0
        }), 2);
        assert!(cache.guilds[&Snowflake(GUILD)].channels.is_empty());
    }

    #[test]
    fn unknown_guilds_are_skipped() {
        let mut cache = Cache::new(10);
        let event = handle(&mut cache, EventName::GuildMemberAdd, &json!({
            "guild_id": "1",
            "user": { "id": "5", "username": "new" }
        }), 0);

        assert!(event.is_none());
        assert!(cache.guilds.is_empty());
    }

    #[test]
    fn guild_outage_keeps_the_guild() {
        let mut cache = cache_with_guild(10);

        let outage = handle(&mut cache, EventName::GuildDelete, &json!({ "id": GUILD.to_string(), "unavailable": true }), 2);
        assert!(matches!(outage, Some(Event::GuildDelete { unavailable: true, .. })));
        assert!(!cache.guilds[&Snowflake(GUILD)].available);

        let left = handle(&mut cache, EventName::GuildDelete, &json!({ "id": GUILD.to_string() }), 2);
        assert!(matches!(left, Some(Event::GuildDelete { guild: Some(_), unavailable: false, .. })));
        assert!(cache.guilds.is_empty());
    }
}
