//! Per route rate limit buckets.
//!
//! A bucket is created the first time a response for its route carries rate limit headers.
//! Once its quota is used up while a reset is pending, new requests wait in a FIFO queue which is released
//! one request at a time after the reset, each finishing before the next one is sent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use reqwest::header::HeaderMap;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Header with the amount of requests which can be made in a window.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header with the amount of requests left in the current window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Header with the seconds (as a float) until the current window resets.
pub const RESET_AFTER_HEADER: &str = "x-ratelimit-reset-after";

/// Routes where the id following the resource name is a major parameter, which gives the route its own bucket.
const MAJOR_RESOURCES: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Derives the key of the bucket a route is limited by.
///
/// The major parameter is kept, any other id becomes `:id` and a trailing id is dropped,
/// so every route below one resource class shares a bucket:
/// `channels/1/messages` and `channels/1/messages/2` both map to `channels/1/messages`.
/// Everything after `reactions` (emoji & user) is ignored.
pub fn bucket_key(route: &str) -> String {
    let path = route.split('?').next().unwrap_or(route).trim_matches('/');
    let segments: Vec<&str> = path.split('/').collect();

    let mut key = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().copied().enumerate() {
        let major = index == 1 && MAJOR_RESOURCES.contains(&segments[0]);
        let id = !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit());

        key.push(if id && !major { ":id" } else { segment });

        if segment == "reactions" {
            break;
        }
    }

    if key.len() > 1 && key.last() == Some(&":id") {
        key.pop();
    }

    key.join("/")
}

/// A delay the api gave in seconds, `None` when it is negative, not a number or too large to wait for.
pub(crate) fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// The rate limit state reported by one response.
pub struct RateLimitHeaders {
    /// Requests allowed per window
    pub limit: u32,

    /// Requests left in this window
    pub remaining: u32,

    /// Time until the window resets
    pub reset_after: Duration,
}

impl RateLimitHeaders {
    /// Reads the rate limit headers of a response, `None` unless all three are present and valid.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
            headers.get(name)?.to_str().ok()
        }

        Some(Self {
            limit: header(headers, LIMIT_HEADER)?.parse().ok()?,
            remaining: header(headers, REMAINING_HEADER)?.parse().ok()?,
            reset_after: seconds(header(headers, RESET_AFTER_HEADER)?.parse().ok()?)?,
        })
    }
}

/// Permission to send one request. Dropping it tells the bucket the request has finished.
#[derive(Debug)]
pub struct Ticket {
    _done: Option<oneshot::Sender<()>>,
}

impl Ticket {
    fn free() -> Self {
        Self { _done: None }
    }
}

#[derive(Debug)]
struct Bucket {
    limit: u32,
    remaining: u32,

    /// A reset timer is armed, at most one per bucket.
    reset_pending: bool,

    /// A task is currently releasing the queue.
    draining: bool,

    /// Requests released from the queue since the last reset.
    released: u32,

    queue: VecDeque<oneshot::Sender<Ticket>>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            limit: 1,
            remaining: 1,
            reset_pending: false,
            draining: false,
            released: 0,
            queue: VecDeque::new(),
        }
    }

    /// Whether a new request has to queue instead of being sent right away.
    fn must_wait(&self) -> bool {
        (self.remaining == 0 && self.reset_pending) || !self.queue.is_empty()
    }

    /// Whether the queue has to stop releasing until the next reset.
    fn exhausted(&self) -> bool {
        self.reset_pending && (self.remaining == 0 || self.released >= self.limit)
    }
}

#[derive(Clone, Debug, Default)]
/// Every bucket of a [`crate::rest::RestClient`], cloning shares the buckets.
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    /// A limiter without any buckets, they are created as responses come in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a request for the bucket `key` may be sent.
    /// Requests for routes without a bucket yet are never held back.
    pub async fn acquire(&self, key: &str) -> Ticket {
        let receiver = {
            let mut buckets = self.buckets.lock().await;

            match buckets.get_mut(key) {
                Some(bucket) if bucket.must_wait() => {
                    let (sender, receiver) = oneshot::channel();
                    bucket.queue.push_back(sender);
                    debug!(bucket = key, queued = bucket.queue.len(), "Request queued until the bucket resets");
                    receiver
                }
                _ => return Ticket::free(),
            }
        };

        // The queue is only ever dropped together with the limiter, in which case nothing is limited anymore.
        receiver.await.unwrap_or_else(|_| Ticket::free())
    }

    /// Applies the rate limit state reported by a response for the bucket `key`.
    /// Arms the reset timer of the bucket unless one is already pending.
    pub async fn update(&self, key: &str, headers: RateLimitHeaders) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_owned()).or_insert_with(Bucket::new);

        bucket.limit = headers.limit;
        bucket.remaining = headers.remaining.min(headers.limit);

        if !bucket.reset_pending {
            bucket.reset_pending = true;

            let limiter = self.clone();
            let key = key.to_owned();
            tokio::spawn(async move {
                sleep(headers.reset_after).await;
                limiter.reset(&key).await;
            });
        }
    }

    /// The requests left in the current window of a bucket, `None` if the bucket doesn't exist yet.
    pub async fn remaining(&self, key: &str) -> Option<u32> {
        self.buckets.lock().await.get(key).map(|bucket| bucket.remaining)
    }

    /// The amount of requests waiting on a bucket.
    pub async fn queued(&self, key: &str) -> usize {
        self.buckets.lock().await.get(key).map_or(0, |bucket| bucket.queue.len())
    }

    async fn reset(&self, key: &str) {
        {
            let mut buckets = self.buckets.lock().await;
            let Some(bucket) = buckets.get_mut(key) else { return };

            bucket.remaining = bucket.limit;
            bucket.reset_pending = false;
            bucket.released = 0;

            if bucket.draining || bucket.queue.is_empty() {
                return;
            }
            bucket.draining = true;
        }

        self.drain(key).await;
    }

    /// Releases queued requests one after another until the queue is empty or the new window is used up.
    async fn drain(&self, key: &str) {
        loop {
            let done = {
                let mut buckets = self.buckets.lock().await;
                let Some(bucket) = buckets.get_mut(key) else { return };

                if bucket.exhausted() {
                    bucket.draining = false;
                    return;
                }

                let Some(waiter) = bucket.queue.pop_front() else {
                    bucket.draining = false;
                    return;
                };

                let (done_sender, done_receiver) = oneshot::channel();
                if waiter.send(Ticket { _done: Some(done_sender) }).is_err() {
                    // The caller stopped waiting
                    continue;
                }
                bucket.released += 1;
                done_receiver
            };

            // Resolves once the released request dropped its ticket
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    fn headers(limit: u32, remaining: u32, reset_after: f64) -> RateLimitHeaders {
        RateLimitHeaders { limit, remaining, reset_after: Duration::from_secs_f64(reset_after) }
    }

    #[test]
    fn routes_below_one_resource_share_a_bucket() {
        assert_eq!(bucket_key("channels/123/messages"), "channels/123/messages");
        assert_eq!(bucket_key("channels/123/messages/456"), "channels/123/messages");
        assert_eq!(bucket_key("/channels/123/messages?limit=50"), "channels/123/messages");
        assert_eq!(bucket_key("channels/123"), "channels/123");
        assert_eq!(bucket_key("channels/123/messages/456/reactions/%F0%9F%91%8D/@me"), "channels/123/messages/:id/reactions");
        assert_eq!(bucket_key("guilds/1/members/2/roles/3"), "guilds/1/members/:id/roles");
        assert_eq!(bucket_key("webhooks/1/secret-token"), "webhooks/1/secret-token");
        assert_eq!(bucket_key("users/@me"), "users/@me");
        assert_ne!(bucket_key("channels/1/messages"), bucket_key("channels/2/messages"));
    }

    #[test]
    fn headers_are_parsed() {
        let mut map = HeaderMap::new();
        map.insert(LIMIT_HEADER, HeaderValue::from_static("5"));
        map.insert(REMAINING_HEADER, HeaderValue::from_static("4"));
        map.insert(RESET_AFTER_HEADER, HeaderValue::from_static("1.5"));
        assert_eq!(RateLimitHeaders::from_headers(&map), Some(headers(5, 4, 1.5)));

        map.remove(RESET_AFTER_HEADER);
        assert_eq!(RateLimitHeaders::from_headers(&map), None);
    }

    #[test]
    fn unusable_reset_after_is_rejected() {
        let mut map = HeaderMap::new();
        map.insert(LIMIT_HEADER, HeaderValue::from_static("5"));
        map.insert(REMAINING_HEADER, HeaderValue::from_static("0"));

        for reset_after in ["1e30", "-1", "inf", "NaN"] {
            map.insert(RESET_AFTER_HEADER, HeaderValue::from_static(reset_after));
            assert_eq!(RateLimitHeaders::from_headers(&map), None, "reset after {reset_after}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_follows_the_server() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.remaining("users/@me").await, None);

        limiter.update("users/@me", headers(5, 3, 1.0)).await;
        assert_eq!(limiter.remaining("users/@me").await, Some(3));

        limiter.update("users/@me", headers(5, 4, 1.0)).await;
        assert_eq!(limiter.remaining("users/@me").await, Some(4));

        limiter.update("users/@me", headers(2, 7, 1.0)).await;
        assert_eq!(limiter.remaining("users/@me").await, Some(2));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.remaining("users/@me").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_releases_in_order() {
        let limiter = RateLimiter::new();
        let key = "channels/1/messages";
        let start = Instant::now();
        limiter.update(key, headers(1, 0, 2.0)).await;

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for name in ["a", "b"] {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let ticket = limiter.acquire(key).await;
                order.lock().unwrap().push((name, start.elapsed()));
                // Every response uses the whole window again
                limiter.update(key, headers(1, 0, 2.0)).await;
                drop(ticket);
            }));
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(limiter.queued(key).await, 2);

        for task in tasks {
            task.await.unwrap();
        }

        let order = order.lock().unwrap();
        assert_eq!(order[0].0, "a");
        assert_eq!(order[1].0, "b");
        assert!(order[0].1 >= Duration::from_secs(2));
        assert!(order[1].1 >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_with_quota_does_not_wait() {
        let limiter = RateLimiter::new();
        let key = "guilds/1";
        limiter.update(key, headers(5, 1, 10.0)).await;

        let start = Instant::now();
        drop(limiter.acquire(key).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
