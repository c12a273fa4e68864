use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Snowflake};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A discord user, shared between guild members, message authors & the current user from READY.
pub struct User {
    pub id: Snowflake,

    #[serde(default)]
    pub username: String,

    /// Legacy four digit tag, "0" for migrated users.
    #[serde(default)]
    pub discriminator: Option<String>,

    #[serde(default)]
    pub global_name: Option<String>,

    /// Avatar hash
    #[serde(default)]
    pub avatar: Option<String>,

    #[serde(default)]
    pub bot: bool,
}

impl User {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.username, raw, "username");
        patch(&mut self.discriminator, raw, "discriminator");
        patch(&mut self.global_name, raw, "global_name");
        patch(&mut self.avatar, raw, "avatar");
        patch(&mut self.bot, raw, "bot");
    }

    /// The mention markup for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}
