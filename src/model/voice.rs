use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{patch, Snowflake};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Voice connection status of a guild member, kept on the [`super::Member`].
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    /// `None` once the user left voice.
    #[serde(default)]
    pub channel_id: Option<Snowflake>,

    pub user_id: Snowflake,

    #[serde(default)]
    pub session_id: String,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub mute: bool,

    #[serde(default)]
    pub self_deaf: bool,

    #[serde(default)]
    pub self_mute: bool,

    #[serde(default)]
    pub suppress: bool,
}

impl VoiceState {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.channel_id, raw, "channel_id");
        patch(&mut self.session_id, raw, "session_id");
        patch(&mut self.deaf, raw, "deaf");
        patch(&mut self.mute, raw, "mute");
        patch(&mut self.self_deaf, raw, "self_deaf");
        patch(&mut self.self_mute, raw, "self_mute");
        patch(&mut self.suppress, raw, "suppress");
    }
}
