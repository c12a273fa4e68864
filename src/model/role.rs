use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Snowflake};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A guild role.
pub struct Role {
    pub id: Snowflake,

    #[serde(default)]
    pub name: String,

    /// RGB colour as an integer, 0 means no colour.
    #[serde(default)]
    pub color: u32,

    /// Whether members with this role are listed separately.
    #[serde(default)]
    pub hoist: bool,

    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub mentionable: bool,

    /// Permission bitfield, sent as a string.
    #[serde(default)]
    pub permissions: String,

    #[serde(default)]
    pub position: i64,
}

impl Role {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.name, raw, "name");
        patch(&mut self.color, raw, "color");
        patch(&mut self.hoist, raw, "hoist");
        patch(&mut self.managed, raw, "managed");
        patch(&mut self.mentionable, raw, "mentionable");
        patch(&mut self.permissions, raw, "permissions");
        patch(&mut self.position, raw, "position");
    }
}
