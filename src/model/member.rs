use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Presence, Snowflake, User, VoiceState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A user inside of a guild.
pub struct Member {
    pub user: User,

    /// Guild specific nickname
    #[serde(default)]
    pub nick: Option<String>,

    #[serde(default)]
    pub roles: Vec<Snowflake>,

    /// ISO8601 timestamp of when the user joined the guild.
    #[serde(default)]
    pub joined_at: Option<String>,

    /// ISO8601 timestamp of when the user started boosting the guild.
    #[serde(default)]
    pub premium_since: Option<String>,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub mute: bool,

    /// Absent until the first presence for this member arrives.
    #[serde(skip)]
    pub presence: Option<Presence>,

    #[serde(skip)]
    pub voice_state: Option<VoiceState>,
}

impl Member {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    /// Merges a GUILD_MEMBER_UPDATE payload into this member.
    pub fn update(&mut self, raw: &Value) {
        if let Some(user) = raw.get("user") {
            self.user.update(user);
        }
        patch(&mut self.nick, raw, "nick");
        patch(&mut self.roles, raw, "roles");
        patch(&mut self.joined_at, raw, "joined_at");
        patch(&mut self.premium_since, raw, "premium_since");
        patch(&mut self.deaf, raw, "deaf");
        patch(&mut self.mute, raw, "mute");
    }

    pub fn id(&self) -> Snowflake {
        self.user.id
    }

    /// Nickname if set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.user.username)
    }
}
