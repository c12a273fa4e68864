use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds between the unix epoch and the first second of 2015, the epoch discord ids count from.
pub const DISCORD_EPOCH: u64 = 1_420_070_400_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A discord id.
/// Sent as a string by the api, but numbers are accepted too.
pub struct Snowflake(pub u64);

impl Snowflake {

    /// Milliseconds since the unix epoch at which this id was created.
    pub fn timestamp(self) -> u64 {
        (self.0 >> 22) + DISCORD_EPOCH
    }

    /// The smallest id which could have been created at a unix timestamp in milliseconds.
    /// Useful as a `before`/`after` bound when requesting messages.
    pub fn from_timestamp(timestamp: u64) -> Self {
        Self(timestamp.saturating_sub(DISCORD_EPOCH) << 22)
    }

    /// The shard which receives events for a guild with this id when connecting with `shard_count` shards.
    pub fn shard_id(self, shard_count: u32) -> u32 {
        ((self.0 >> 22) % shard_count.max(1) as u64) as u32
    }
}

impl Snowflake {

    /// Reads `raw[key]` as an id.
    pub(crate) fn deserialize_from(raw: &serde_json::Value, key: &str) -> serde_json::Result<Self> {
        match raw.get(key) {
            Some(value) => Self::deserialize(value),
            None => Err(de::Error::custom(format!("missing field `{key}`"))),
        }
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl<'de> Visitor<'de> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake as a string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}
