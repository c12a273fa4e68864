use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Snowflake, User};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A custom guild emoji.
pub struct Emoji {
    pub id: Snowflake,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub animated: bool,

    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub require_colons: bool,

    /// Roles allowed to use this emoji, empty means everyone.
    #[serde(default)]
    pub roles: Vec<Snowflake>,

    /// The user who uploaded the emoji, only present with the right permissions.
    #[serde(default)]
    pub user: Option<User>,
}

impl Emoji {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.name, raw, "name");
        patch(&mut self.animated, raw, "animated");
        patch(&mut self.managed, raw, "managed");
        patch(&mut self.require_colons, raw, "require_colons");
        patch(&mut self.roles, raw, "roles");
        patch(&mut self.user, raw, "user");
    }
}
