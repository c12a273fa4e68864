//! Typed entities materialized from raw gateway & api payloads.
//!
//! Every entity can be created from a raw payload and updated in place from a later one.
//! Updates merge: only the keys present in the update payload are written, everything else is left untouched,
//! so applying the same update twice leaves the entity exactly as applying it once.

pub mod channel;
pub mod emoji;
pub mod guild;
pub mod id;
pub mod member;
pub mod message;
pub mod presence;
pub mod role;
pub mod user;
pub mod voice;

pub use channel::{Channel, ChannelType, PermissionOverwrite};
pub use emoji::Emoji;
pub use guild::Guild;
pub use id::Snowflake;
pub use member::Member;
pub use message::{Message, MessageCache};
pub use presence::{Activity, ClientStatus, Presence};
pub use role::Role;
pub use user::User;
pub use voice::VoiceState;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Overwrite `field` with `raw[key]` when the key is present and holds a value of the right shape.
/// Returns whether the field was written.
pub(crate) fn patch<T: DeserializeOwned>(field: &mut T, raw: &Value, key: &str) -> bool {
    match raw.get(key).map(|value| T::deserialize(value)) {
        Some(Ok(value)) => {
            *field = value;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_only_touches_present_keys() {
        let raw = json!({ "name": "new", "topic": null, "position": "wrong type" });

        let mut name = String::from("old");
        let mut topic = Some(String::from("kept?"));
        let mut position = 3u32;
        let mut nsfw = true;

        assert!(patch(&mut name, &raw, "name"));
        assert!(patch(&mut topic, &raw, "topic"));
        assert!(!patch(&mut position, &raw, "position"));
        assert!(!patch(&mut nsfw, &raw, "nsfw"));

        assert_eq!(name, "new");
        assert_eq!(topic, None);
        assert_eq!(position, 3);
        assert!(nsfw);
    }
}
