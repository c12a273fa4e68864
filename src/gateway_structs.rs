//! A file specifically designated to creation of structs which represent Payloads & Objects being sent through the Discord Gateway & related.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::model::User;

#[derive(Deserialize, Debug, Clone, Copy)]
/// [The limits imposed on new sessions which are started.][https://discord.com/developers/docs/topics/gateway#session-start-limit-object]
pub struct SessionStartLimit {

    #[serde(rename = "total")]
    /// The total number of session starts the current [`crate::bot::Bot`] is allowed
    pub total_sessions: u32,

    #[serde(rename = "remaining")]
    /// The remaining number of session starts the current [`crate::bot::Bot`] is allowed
    pub remaining_sessions: u32,

    /// The number of milliseconds after which the limit for starting sessions resets
    pub reset_after: u64,

    /// The number of identify requests allowed per 5 seconds
    /// Useful for determining the size for [shard buckets][https://discord.com/developers/docs/topics/gateway#sharding-max-concurrency]
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

#[derive(Deserialize, Debug, Clone)]
/// A struct which represents the response from the GET gateway request
pub struct GetGatewayResponse {

    /// The WSS URL that can be used for connecting to the gateway
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
/// A struct which represents the response from the GET gateway/bot request
pub struct GetGatewayBotResponse {

    /// The WSS URL that can be used for connecting to the gateway
    pub url: String,

    /// The recommended number of shards to use when connecting
    pub shards: u32,

    /// Information on the current session start limit
    pub session_start_limit: Option<SessionStartLimit>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// [Gateway opcodes][https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-opcodes] denoting the payload type
pub enum OpCode {
    /// Receive: an event was dispatched, `t` holds its name.
    Dispatch,
    /// Send/Receive: keeps the connection alive, the gateway may ask for one immediately.
    Heartbeat,
    /// Send: starts a new session.
    Identify,
    /// Send: updates the presence of the bot.
    PresenceUpdate,
    /// Send: resumes a previous session.
    Resume,
    /// Receive: the gateway wants us to reconnect & resume.
    Reconnect,
    /// Receive: the session is no longer valid.
    InvalidSession,
    /// Receive: first payload after connecting, contains the heartbeat interval.
    Hello,
    /// Receive: a heartbeat was received.
    HeartbeatAck,
    /// An opcode this library does not handle.
    Unknown(u8),
}

impl From<u8> for OpCode {
    fn from(op: u8) -> Self {
        match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Unknown(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
            OpCode::Unknown(other) => other,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone)]
/// The Hello payload recieved from Discords gateway whenever a new connection gateway
pub struct Hello {
    /// The interval (in milliseconds) the client should heartbeat with
    pub heartbeat_interval: u64,
}

#[derive(Debug, Serialize, Clone)]
/// Payload used to trigger the initial handshake with the gateway.
pub struct Identify {

    /// The authentication token for this bot
    pub token: Arc<str>,

    #[serde(rename = "properties")]
    /// Information about the connection sent to discord.
    pub connection_properties: IdentifyConnectionProperties,

    /// The current shard which is an array of [shard_id, total_shards]
    pub shard: [u32; 2],

    //Compress not included as this library does not support packet compression

    /// the Gateway intents you wish to recieve
    pub intents: u32,
}

#[derive(Debug, Serialize, Clone, Copy)]
/// Connection information/properties related to the Identify handshake payload.
pub struct IdentifyConnectionProperties {

    #[serde(rename = "os")]
    /// The operating system the bot uses
    pub operating_system: &'static str,

    /// Library Name
    pub browser: &'static str,

    /// Library Name
    pub device: &'static str,
}

impl Default for IdentifyConnectionProperties {
    fn default() -> Self {
        Self {
            operating_system: std::env::consts::OS,
            browser: env!("CARGO_PKG_NAME"),
            device: env!("CARGO_PKG_NAME"),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
/// Payload used to replay missed events of a previous session after reconnecting.
pub struct Resume {

    /// The authentication token for this bot
    pub token: Arc<str>,

    /// Session id received in the READY event of the session to resume.
    pub session_id: String,

    /// Last sequence number received on the session to resume.
    pub seq: u64,
}

#[derive(Deserialize, Debug, Clone)]
/// The parts of the READY dispatch a shard needs for itself, the rest goes through the cache.
pub struct Ready {

    /// Id of the session, required for resuming.
    pub session_id: String,

    /// Url to use when resuming this session.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,

    /// The current user
    pub user: User,
}

#[derive(Debug, Serialize, Clone, Default)]
/// Payload used to update the status of the bot on a shard.
pub struct PresenceUpdate {

    /// Unix time (in milliseconds) of when the bot went idle, or `None` if it isn't idle.
    pub since: Option<u64>,

    /// The activities of the bot, each is an object with at least a `name` & a `type`.
    pub activities: Vec<Value>,

    /// One of "online", "dnd", "idle", "invisible" or "offline".
    pub status: String,

    /// Whether or not the bot is afk
    pub afk: bool,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
/// Representation of a payload to be sent or recieved from Discords Gateway.
pub struct Payload<T> {

    #[serde(rename = "op")]
    /// The opcode of this payload that denotes the payload type
    pub opcode: u8,

    #[serde(rename = "d")]
    /// The data of this payload
    pub data: T,

    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    /// Sequence number of this payload
    /// Used for resuming sessions and heartbeats
    pub sequence_number: Option<u64>,

    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    /// The event name for this payload
    pub event_name: Option<String>,
}

/// Any payload received from the gateway, `d` is decoded once the opcode is known.
pub type RawPayload = Payload<Value>;

impl<T: Serialize> Payload<T> {

    /// Converts a struct into a Tungstenite Message through serde_json
    pub fn serialize_to_message(&self) -> serde_json::Result<Message> {

        // Serialize the struct by converting it into a string & then create a Message from that.
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

impl<T> Payload<T> {

    /// Creates a new payload with only the opcode & data fields set.
    pub fn new(opcode: OpCode, data: T) -> Self {
        Self {
            opcode: opcode.into(),
            data,
            sequence_number: None,
            event_name: None,
        }
    }

    /// The opcode of this payload.
    pub fn op(&self) -> OpCode {
        OpCode::from(self.opcode)
    }
}
