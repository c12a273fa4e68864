//! The rate limited dispatcher for the Discord api, every REST call of the library goes through [`RestClient::request`].

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway_structs::{GetGatewayBotResponse, GetGatewayResponse};
use crate::http::{DiscordHttpClient, DiscordHttpRequest, FileAttachment};
use crate::model::{Channel, Member, Message, Role, Snowflake, User};
use crate::ratelimit::{bucket_key, seconds, RateLimitHeaders, RateLimiter};
use crate::{BASE_API_URL, DISCORD_API_VERSION};

/// Bytes which stay as they are in an emoji path segment: unreserved characters & the `:` of custom emojis.
const EMOJI_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b':');

/// Wait before retrying a 429 which carries no usable delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
/// Sends requests to the Discord api while respecting its rate limits.
/// Cloning is cheap, clones share the HTTP connection pool & the rate limit buckets.
pub struct RestClient {
    http: DiscordHttpClient,
    ratelimiter: RateLimiter,
}

impl RestClient {

    /// Creates a client for the Discord api authenticating with a bot token.
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_url(BASE_API_URL, Some(token))
    }

    /// Creates a client for the api at `api_url`, e.g. a proxy or a mock server.
    pub fn with_api_url(api_url: &str, token: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: DiscordHttpClient::new(api_url, DISCORD_API_VERSION, token)?,
            ratelimiter: RateLimiter::new(),
        })
    }

    pub fn http(&self) -> &DiscordHttpClient {
        &self.http
    }

    pub fn ratelimiter(&self) -> &RateLimiter {
        &self.ratelimiter
    }

    /// Sends a request & resolves with the JSON body of its response, `None` for empty bodies.
    ///
    /// Requests on an exhausted bucket wait for the bucket to reset.
    /// A 429 response is never returned, the request is sent again after the delay the api asked for
    /// until it gets any other answer. Other failing statuses become [`Error::Api`].
    pub async fn request(&self, request: DiscordHttpRequest) -> Result<Option<Value>> {
        self.dispatch(&self.http, request).await
    }

    async fn dispatch(&self, http: &DiscordHttpClient, request: DiscordHttpRequest) -> Result<Option<Value>> {
        let bucket = bucket_key(&request.route);

        loop {
            let ticket = self.ratelimiter.acquire(&bucket).await;

            let response = http.send(&request).await?;
            let status = response.status();

            if let Some(headers) = RateLimitHeaders::from_headers(response.headers()) {
                self.ratelimiter.update(&bucket, headers).await;
            }

            // The bucket is up to date, queued requests may continue
            drop(ticket);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let header_delay = retry_after_header(response.headers());
                let body = response.bytes().await?;
                let delay = retry_after_body(&body).or(header_delay).unwrap_or(DEFAULT_RETRY_AFTER);

                warn!(method = %request.method, route = %request.route, ?delay, "Rate limited, retrying");
                sleep(delay).await;
                continue;
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            let body = response.bytes().await?;

            if status.as_u16() < 300 {
                if body.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(serde_json::from_slice(&body)?));
            }

            let error = api_error(status, &body);
            warn!(method = %request.method, route = %request.route, %error, "Request failed");
            return Err(error);
        }
    }

    /// [`RestClient::request`] with the body deserialized into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: DiscordHttpRequest) -> Result<T> {
        let value = self.request(request).await?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// The url of the gateway, requires no authentication.
    pub async fn get_gateway(&self) -> Result<GetGatewayResponse> {
        let value = self.dispatch(&self.http.unauthenticated(), DiscordHttpRequest::get("gateway")).await?;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }

    /// The url of the gateway together with the recommended amount of shards & the session start limit.
    pub async fn get_gateway_bot(&self) -> Result<GetGatewayBotResponse> {
        let response: GetGatewayBotResponse = self.request_json(DiscordHttpRequest::get("gateway/bot")).await?;
        debug!(url = %response.url, shards = response.shards, "Received gateway information");
        Ok(response)
    }

    pub async fn current_user(&self) -> Result<User> {
        self.request_json(DiscordHttpRequest::get("users/@me")).await
    }

    /// Edits the current user, `changes` holds the fields to change (username, avatar).
    pub async fn edit_current_user(&self, changes: Value) -> Result<User> {
        self.request_json(DiscordHttpRequest::patch("users/@me").with_body(changes)).await
    }

    /// Opens a private channel with a user.
    pub async fn create_dm(&self, recipient_id: Snowflake) -> Result<Channel> {
        let request = DiscordHttpRequest::post("users/@me/channels")
            .with_body(json!({ "recipient_id": recipient_id }));
        self.request_json(request).await
    }

    pub async fn get_channel(&self, channel_id: Snowflake) -> Result<Channel> {
        self.request_json(DiscordHttpRequest::get(format!("channels/{channel_id}"))).await
    }

    pub async fn edit_channel(&self, channel_id: Snowflake, changes: Value, reason: Option<&str>) -> Result<Channel> {
        let request = with_reason(DiscordHttpRequest::patch(format!("channels/{channel_id}")).with_body(changes), reason);
        self.request_json(request).await
    }

    /// Deletes a guild channel or closes a private one.
    pub async fn delete_channel(&self, channel_id: Snowflake, reason: Option<&str>) -> Result<Channel> {
        let request = with_reason(DiscordHttpRequest::delete(format!("channels/{channel_id}")), reason);
        self.request_json(request).await
    }

    /// Messages of a channel, `query` holds the `limit`/`before`/`after`/`around` parameters.
    pub async fn get_messages(&self, channel_id: Snowflake, query: Value) -> Result<Vec<Message>> {
        let request = DiscordHttpRequest::get(format!("channels/{channel_id}/messages")).with_body(query);
        self.request_json(request).await
    }

    pub async fn get_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<Message> {
        self.request_json(DiscordHttpRequest::get(format!("channels/{channel_id}/messages/{message_id}"))).await
    }

    /// Sends a message, `content` is either a string or a full message object.
    pub async fn create_message(&self, channel_id: Snowflake, content: Value, files: Vec<FileAttachment>) -> Result<Message> {
        let body = match content {
            Value::String(content) => json!({ "content": content }),
            other => other,
        };

        let mut request = DiscordHttpRequest::post(format!("channels/{channel_id}/messages")).with_body(body);
        request.files = files;
        self.request_json(request).await
    }

    pub async fn edit_message(&self, channel_id: Snowflake, message_id: Snowflake, changes: Value) -> Result<Message> {
        let request = DiscordHttpRequest::patch(format!("channels/{channel_id}/messages/{message_id}")).with_body(changes);
        self.request_json(request).await
    }

    pub async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::delete(format!("channels/{channel_id}/messages/{message_id}")), reason);
        self.request(request).await.map(drop)
    }

    /// Deletes 2 to 100 messages at once.
    pub async fn bulk_delete_messages(&self, channel_id: Snowflake, message_ids: &[Snowflake], reason: Option<&str>) -> Result<()> {
        let request = DiscordHttpRequest::post(format!("channels/{channel_id}/messages/bulk-delete"))
            .with_body(json!({ "messages": message_ids }));
        self.request(with_reason(request, reason)).await.map(drop)
    }

    /// Reacts to a message, `emoji` is either a unicode emoji or `name:id` for custom ones.
    pub async fn add_reaction(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &str) -> Result<()> {
        let route = format!("channels/{channel_id}/messages/{message_id}/reactions/{}/@me", encode_emoji(emoji));
        self.request(DiscordHttpRequest::put(route)).await.map(drop)
    }

    /// Removes a reaction of the current user, or of `user_id` when given.
    pub async fn remove_reaction(&self, channel_id: Snowflake, message_id: Snowflake, emoji: &str, user_id: Option<Snowflake>) -> Result<()> {
        let user = user_id.map_or_else(|| "@me".to_owned(), |user_id| user_id.to_string());
        let route = format!("channels/{channel_id}/messages/{message_id}/reactions/{}/{user}", encode_emoji(emoji));
        self.request(DiscordHttpRequest::delete(route)).await.map(drop)
    }

    pub async fn trigger_typing(&self, channel_id: Snowflake) -> Result<()> {
        self.request(DiscordHttpRequest::post(format!("channels/{channel_id}/typing"))).await.map(drop)
    }

    pub async fn get_pins(&self, channel_id: Snowflake) -> Result<Vec<Message>> {
        self.request_json(DiscordHttpRequest::get(format!("channels/{channel_id}/pins"))).await
    }

    pub async fn pin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.request(DiscordHttpRequest::put(format!("channels/{channel_id}/pins/{message_id}"))).await.map(drop)
    }

    pub async fn unpin_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.request(DiscordHttpRequest::delete(format!("channels/{channel_id}/pins/{message_id}"))).await.map(drop)
    }

    /// The raw guild object, materialize it through [`crate::model::Guild::create`] if needed.
    pub async fn get_guild(&self, guild_id: Snowflake) -> Result<Value> {
        self.request_json(DiscordHttpRequest::get(format!("guilds/{guild_id}"))).await
    }

    pub async fn edit_guild(&self, guild_id: Snowflake, changes: Value, reason: Option<&str>) -> Result<Value> {
        let request = with_reason(DiscordHttpRequest::patch(format!("guilds/{guild_id}")).with_body(changes), reason);
        self.request_json(request).await
    }

    pub async fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Member> {
        self.request_json(DiscordHttpRequest::get(format!("guilds/{guild_id}/members/{user_id}"))).await
    }

    pub async fn edit_member(&self, guild_id: Snowflake, user_id: Snowflake, changes: Value, reason: Option<&str>) -> Result<()> {
        let request = DiscordHttpRequest::patch(format!("guilds/{guild_id}/members/{user_id}")).with_body(changes);
        self.request(with_reason(request, reason)).await.map(drop)
    }

    pub async fn kick_member(&self, guild_id: Snowflake, user_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::delete(format!("guilds/{guild_id}/members/{user_id}")), reason);
        self.request(request).await.map(drop)
    }

    /// Bans a user, deleting their messages of the last `delete_message_seconds`.
    pub async fn ban_member(&self, guild_id: Snowflake, user_id: Snowflake, delete_message_seconds: u32, reason: Option<&str>) -> Result<()> {
        let request = DiscordHttpRequest::put(format!("guilds/{guild_id}/bans/{user_id}"))
            .with_body(json!({ "delete_message_seconds": delete_message_seconds }));
        self.request(with_reason(request, reason)).await.map(drop)
    }

    pub async fn unban_member(&self, guild_id: Snowflake, user_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::delete(format!("guilds/{guild_id}/bans/{user_id}")), reason);
        self.request(request).await.map(drop)
    }

    pub async fn add_member_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::put(format!("guilds/{guild_id}/members/{user_id}/roles/{role_id}")), reason);
        self.request(request).await.map(drop)
    }

    pub async fn remove_member_role(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::delete(format!("guilds/{guild_id}/members/{user_id}/roles/{role_id}")), reason);
        self.request(request).await.map(drop)
    }

    pub async fn create_role(&self, guild_id: Snowflake, role: Value, reason: Option<&str>) -> Result<Role> {
        let request = with_reason(DiscordHttpRequest::post(format!("guilds/{guild_id}/roles")).with_body(role), reason);
        self.request_json(request).await
    }

    pub async fn edit_role(&self, guild_id: Snowflake, role_id: Snowflake, changes: Value, reason: Option<&str>) -> Result<Role> {
        let request = with_reason(DiscordHttpRequest::patch(format!("guilds/{guild_id}/roles/{role_id}")).with_body(changes), reason);
        self.request_json(request).await
    }

    pub async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake, reason: Option<&str>) -> Result<()> {
        let request = with_reason(DiscordHttpRequest::delete(format!("guilds/{guild_id}/roles/{role_id}")), reason);
        self.request(request).await.map(drop)
    }
}

fn with_reason(request: DiscordHttpRequest, reason: Option<&str>) -> DiscordHttpRequest {
    match reason {
        Some(reason) => request.with_reason(reason),
        None => request,
    }
}

/// Delay from the `retry-after` header of a 429, given in seconds.
fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    seconds(headers.get(RETRY_AFTER)?.to_str().ok()?.parse().ok()?)
}

/// Delay from the `retry_after` field of a 429 body, given in seconds.
fn retry_after_body(body: &[u8]) -> Option<Duration> {
    seconds(serde_json::from_slice::<Value>(body).ok()?.get("retry_after")?.as_f64()?)
}

/// Builds the error for a failing response, the body's `code` & `message` win over the HTTP status.
fn api_error(status: StatusCode, body: &[u8]) -> Error {
    let body = serde_json::from_slice::<Value>(body).unwrap_or(Value::Null);

    let code = body.get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u32::try_from(code).ok())
        .unwrap_or_else(|| u32::from(status.as_u16()));

    let message = body.get("message")
        .and_then(Value::as_str)
        .or_else(|| status.canonical_reason())
        .unwrap_or_default()
        .to_owned();

    Error::Api { status, code, message }
}

/// Percent-encodes an emoji so it can be used as a path segment.
fn encode_emoji(emoji: &str) -> String {
    utf8_percent_encode(emoji, EMOJI_SEGMENT).to_string()
}
