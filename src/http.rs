//! The transport underneath the rate limited [`crate::rest::RestClient`]: builds & sends one request to the api.

use reqwest::header::*;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response as HttpResponse};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// The User-Agent discord requires from bots: `DiscordBot ($url, $versionNumber)`
pub const USER_AGENT_VALUE: &str = concat!("DiscordBot (", env!("CARGO_PKG_REPOSITORY"), ", ", env!("CARGO_PKG_VERSION"), ")");

/// The header carrying the reason shown in a guild's audit log.
pub const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

#[derive(Debug, Clone)]
/// The client
pub struct DiscordHttpClient {

    // reqwest HTTP client used for requests on the Discord api.
    pub client: Client,

    // The base url to be built upon when requesting, always ends with a '/'.
    pub base_url: String,

    // Value of the Authorization header for requests which don't bring their own token.
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
/// A file uploaded with a request, sent as one part of a multipart form.
pub struct FileAttachment {

    /// The name the file is uploaded with.
    pub name: String,

    /// Raw contents of the file.
    pub data: Vec<u8>,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone)]
/// Represents a request to the Discord Api
pub struct DiscordHttpRequest {

    /// The method to use for the request
    pub method: Method,

    /// Path below the versioned api url with resource ids already filled in, e.g. `channels/123/messages`
    pub route: String,

    /// Authorization header value overriding the client's own token.
    pub token: Option<String>,

    /// JSON body for mutating methods, query parameters for GET.
    pub body: Option<Value>,

    /// Reason shown in the guild's audit log.
    pub reason: Option<String>,

    /// Files to upload, turns the body into the `payload_json` field of a multipart form.
    pub files: Vec<FileAttachment>,

    /// A map of extra headers to add upon the default ones.
    pub headers: HeaderMap,
}

impl DiscordHttpRequest {

    /// Constructs a new [`DiscordHttpRequest`]
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            token: None,
            body: None,
            reason: None,
            files: Vec::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn get(route: impl Into<String>) -> Self {
        Self::new(Method::GET, route)
    }

    pub fn post(route: impl Into<String>) -> Self {
        Self::new(Method::POST, route)
    }

    pub fn put(route: impl Into<String>) -> Self {
        Self::new(Method::PUT, route)
    }

    pub fn patch(route: impl Into<String>) -> Self {
        Self::new(Method::PATCH, route)
    }

    pub fn delete(route: impl Into<String>) -> Self {
        Self::new(Method::DELETE, route)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }
}

impl DiscordHttpClient {

    /// Creates a client for `{base_url}/v{version}/`, sending `Bot {token}` as authorization when a token is given.
    pub fn new(base_url: &str, version: u32, token: Option<&str>) -> Result<Self> {

        // Default headers required for utilising discord api.
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        // Create the reqwest client utilised for https requests to discords api.
        // Accept-Encoding & decompression of gzip/deflate responses are handled by reqwest.
        let client = Client::builder()
            .default_headers(default_headers)
            .gzip(true)
            .deflate(true)
            .build()?;

        // Create the base url utilised for all requests once here.
        let base_url = format!("{}/v{version}/", base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            base_url,
            authorization: token.map(authorization_value),
        })
    }

    /// This client without its token, for routes which don't take authorization such as `gateway`.
    /// Shares the connection pool of this client.
    pub fn unauthenticated(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            authorization: None,
        }
    }

    /// Sets up a request through [`DiscordHttpClient`]
    /// Headers, query, JSON or multipart body are all derived from the [`DiscordHttpRequest`]
    pub fn request(&self, request: &DiscordHttpRequest) -> Result<RequestBuilder> {

        // Constructs the full URL utilised for this request
        let url = format!("{}{}", self.base_url, request.route.trim_start_matches('/'));
        debug!(method = %request.method, %url, "Sending request to the Discord api");

        let mut builder = self.client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        // The token of the request wins over the token of the client
        let authorization = request.token.clone().or_else(|| self.authorization.clone());
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        }

        if let Some(reason) = &request.reason {
            builder = builder.header(AUDIT_LOG_REASON, HeaderValue::from_str(reason)?);
        }

        if !request.files.is_empty() {
            let mut form = Form::new();
            for (index, file) in request.files.iter().enumerate() {
                let part = Part::bytes(file.data.clone()).file_name(file.name.clone());
                form = form.part(format!("file{index}"), part);
            }
            if let Some(body) = &request.body {
                form = form.text("payload_json", serde_json::to_string(body)?);
            }
            return Ok(builder.multipart(form));
        }

        Ok(match (&request.body, request.method == Method::GET) {
            (Some(body), true) => builder.query(body),
            (Some(body), false) => builder.json(body),
            (None, _) => builder,
        })
    }

    /// Sends a request once, without looking at rate limits.
    pub async fn send(&self, request: &DiscordHttpRequest) -> Result<HttpResponse> {
        Ok(self.request(request)?.send().await?)
    }
}

/// Turns a bot token into the value of an Authorization header, tokens which already carry a scheme are kept as is.
pub fn authorization_value(token: &str) -> String {
    if token.starts_with("Bot ") || token.starts_with("Bearer ") {
        token.to_owned()
    } else {
        format!("Bot {token}")
    }
}
