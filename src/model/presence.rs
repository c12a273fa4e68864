use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::patch;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// Online status & activities of a guild member.
pub struct Presence {
    /// One of "online", "idle", "dnd" or "offline"
    #[serde(default = "offline")]
    pub status: String,

    #[serde(default)]
    pub activities: Vec<Activity>,

    /// Status per platform, platforms missing from the payload are offline.
    #[serde(default)]
    pub client_status: ClientStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// Something a user is doing, e.g. playing a game or streaming.
pub struct Activity {
    pub name: String,

    /// 0 playing, 1 streaming, 2 listening, 3 watching, 4 custom, 5 competing
    #[serde(rename = "type", default)]
    pub kind: u8,

    /// Stream url, only for streaming activities.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub application_id: Option<String>,

    #[serde(default)]
    pub details: Option<String>,

    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub timestamps: Option<Value>,

    #[serde(default)]
    pub assets: Option<Value>,

    #[serde(default)]
    pub party: Option<Value>,

    #[serde(default)]
    pub flags: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatus {
    #[serde(default = "offline")]
    pub desktop: String,

    #[serde(default = "offline")]
    pub mobile: String,

    #[serde(default = "offline")]
    pub web: String,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            desktop: offline(),
            mobile: offline(),
            web: offline(),
        }
    }
}

fn offline() -> String {
    String::from("offline")
}

impl Presence {
    pub fn create(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    pub fn update(&mut self, raw: &Value) {
        patch(&mut self.status, raw, "status");
        patch(&mut self.activities, raw, "activities");

        // A client status object only lists platforms the user is connected on
        if let Some(client_status) = raw.get("client_status") {
            if let Ok(client_status) = ClientStatus::deserialize(client_status) {
                self.client_status = client_status;
            }
        }
    }

    /// The first activity, which is what the official client displays.
    pub fn game(&self) -> Option<&Activity> {
        self.activities.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_platforms_are_offline() {
        let presence = Presence::create(&json!({
            "status": "idle",
            "client_status": { "mobile": "idle" },
            "activities": [{ "name": "rust", "type": 0 }]
        }))
        .unwrap();

        assert_eq!(presence.client_status.mobile, "idle");
        assert_eq!(presence.client_status.desktop, "offline");
        assert_eq!(presence.game().map(|game| game.name.as_str()), Some("rust"));
    }

    #[test]
    fn update_keeps_activities_when_absent() {
        let mut presence = Presence::create(&json!({
            "status": "online",
            "activities": [{ "name": "rust", "type": 0 }]
        }))
        .unwrap();

        presence.update(&json!({ "status": "dnd" }));

        assert_eq!(presence.status, "dnd");
        assert_eq!(presence.activities.len(), 1);
    }
}
