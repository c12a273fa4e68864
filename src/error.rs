//! Errors which are surfaced to users of the library.
//!
//! Transient failures (socket closes, failed connects, 429 responses) are retried inside the component which
//! detected them and never show up here, only authoritative api errors and fatal gateway failures do.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
/// Every error a [`crate::rest::RestClient`] or [`crate::client::DiscordClient`] can hand back to the caller.
pub enum Error {

    /// The HTTP request could not be built or sent.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The gateway websocket could not be used.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A header value (token or audit log reason) contains characters which can't be sent.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The api answered with a status which is not a success and not a 429.
    #[error("Discord API error {code} ({status}): {message}")]
    Api {
        /// HTTP status of the response.
        status: StatusCode,

        /// Machine readable error code from the response body, falls back to the HTTP status.
        code: u32,

        /// Human readable message from the response body.
        message: String,
    },

    /// The gateway closed a shard with a code which must not be retried.
    #[error("Shard {shard_id} was closed by the gateway with code {code}: {reason}")]
    AuthenticationFailed {
        /// Zero-based id of the shard which was refused.
        shard_id: u32,

        /// The close code sent by the gateway.
        code: u16,

        /// The close reason sent by the gateway.
        reason: String,
    },

    /// The amount of shards requested can't be used.
    #[error("Amount of shards must be > 0")]
    InvalidShardCount,

    /// A required environment variable is missing or malformed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The client or one of its channels has already shut down.
    #[error("The client has been closed")]
    ClientClosed,
}

impl Error {

    /// The machine readable api error code, if this is an api error.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The HTTP status of the failed response, if this is an api error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(error) => error.status(),
            _ => None,
        }
    }
}
