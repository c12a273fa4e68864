use std::future::Future;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tonsoe_harmony::bot::{Bot, Intents, ShardingOption};
use tonsoe_harmony::error::Error;
use tonsoe_harmony::gateway_structs::PresenceUpdate;
use tonsoe_harmony::model::Snowflake;
use tonsoe_harmony::{Event, GatewayEvent, ShardStatus};

const WAIT: Duration = Duration::from_secs(5);

/// One client connection accepted by the mock gateway.
struct Connection {
    index: usize,
    socket: WebSocketStream<TcpStream>,
    received: UnboundedSender<(usize, Value)>,
}

impl Connection {
    async fn send(&mut self, payload: Value) {
        self.socket.send(Message::Text(payload.to_string())).await.unwrap();
    }

    async fn hello(&mut self, heartbeat_interval: u64) {
        self.send(json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval }, "s": null, "t": null })).await;
    }

    async fn dispatch(&mut self, name: &str, sequence: u64, data: Value) {
        self.send(json!({ "op": 0, "d": data, "s": sequence, "t": name })).await;
    }

    async fn ready(&mut self, session_id: &str, sequence: u64) {
        let data = json!({
            "v": 10,
            "session_id": session_id,
            "user": { "id": "1000", "username": "harmony", "bot": true },
            "guilds": []
        });
        self.dispatch("READY", sequence, data).await;
    }

    /// The next payload which is not a heartbeat, heartbeats are acknowledged on the way.
    /// Every payload is reported to the test, `None` once the client went away.
    async fn recv(&mut self) -> Option<Value> {
        while let Some(Ok(message)) = self.socket.next().await {
            let payload: Value = match message {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                Message::Close(_) => return None,
                _ => continue,
            };
            let _ = self.received.send((self.index, payload.clone()));

            if payload["op"] == 1 {
                self.send(json!({ "op": 11 })).await;
                continue;
            }
            return Some(payload);
        }
        None
    }

    async fn close(&mut self, code: u16, reason: &'static str) {
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
        let _ = self.socket.close(Some(frame)).await;
    }

    /// Keeps answering heartbeats until the client disconnects.
    async fn idle(mut self) {
        while self.recv().await.is_some() {}
    }
}

/// Starts a gateway on a free local port, every accepted connection is handed to `script`.
async fn mock_gateway<F, Fut>(script: F) -> (String, UnboundedReceiver<(usize, Value)>)
where
    F: Fn(Connection) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (received, receiver) = unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let socket = accept_async(stream).await.unwrap();
            tokio::spawn(script(Connection { index, socket, received: received.clone() }));
            index += 1;
        }
    });

    (url, receiver)
}

fn bot(gateway_url: &str, shards: u32) -> Bot {
    let mut bot = Bot::new("token".into());
    bot.set_intents(Intents::GUILDS | Intents::GUILD_MESSAGES, true);
    bot.set_sharding_option(ShardingOption::SetAmount(shards));
    bot.gateway_url = Some(gateway_url.to_owned());
    bot.identify_delay = Duration::from_millis(200);
    bot.reconnect_delay = Duration::from_millis(50);
    bot
}

/// Waits for the first event matching `wanted`, skipping the others.
async fn next_event(events: &mut Receiver<GatewayEvent>, wanted: impl Fn(&Event) -> bool) -> GatewayEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event.event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

/// Waits for the next payload the mock gateway received which satisfies `wanted`.
async fn next_received(received: &mut UnboundedReceiver<(usize, Value)>, wanted: impl Fn(&Value) -> bool) -> (usize, Value) {
    timeout(WAIT, async {
        loop {
            let (index, payload) = received.recv().await.unwrap();
            if wanted(&payload) {
                return (index, payload);
            }
        }
    })
    .await
    .expect("payload did not arrive in time")
}

fn op(code: u64) -> impl Fn(&Value) -> bool {
    move |payload| payload["op"] == code
}

#[tokio::test]
async fn shard_identifies_and_materializes_guilds() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        connection.recv().await;
        connection.ready("session", 1).await;
        connection.dispatch("GUILD_CREATE", 2, json!({
            "id": "41771983423143937",
            "name": "Discord Developers",
            "channels": [{ "id": "41771983423143938", "type": 0, "name": "general" }],
            "members": [{ "user": { "id": "1000", "username": "harmony" }, "roles": [] }]
        })).await;
        connection.idle().await;
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();
    let mut events = client.subscribe();

    let (_, identify) = next_received(&mut received, op(2)).await;
    assert_eq!(identify["d"]["token"], "token");
    assert_eq!(identify["d"]["shard"], json!([0, 1]));
    assert_eq!(identify["d"]["intents"], (1 << 0) | (1 << 9));
    assert!(identify["d"]["properties"]["os"].is_string());

    let shard_ready = next_event(&mut events, |event| matches!(event, Event::ShardReady)).await;
    assert_eq!(shard_ready.shard_id, 0);

    let created = next_event(&mut events, |event| matches!(event, Event::GuildCreate(_))).await;
    match created.event {
        Event::GuildCreate(guild) => assert_eq!(guild.name, "Discord Developers"),
        _ => unreachable!(),
    }

    {
        let cache = client.cache().read().await;
        let guild = cache.guild(Snowflake(41771983423143937)).unwrap();
        assert_eq!(guild.shard_id, 0);
        assert_eq!(guild.channels.len(), 1);
        assert_eq!(cache.user.as_ref().map(|user| user.username.as_str()), Some("harmony"));
    }

    let shard = client.shard(0).await.unwrap();
    assert_eq!(shard.status(), ShardStatus::Ready);

    shard.update_presence(PresenceUpdate { status: "idle".into(), ..Default::default() }).await.unwrap();
    let (_, presence) = next_received(&mut received, op(3)).await;
    assert_eq!(presence["d"]["status"], "idle");

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
    assert_eq!(shard.status(), ShardStatus::Closed);
}

#[tokio::test]
async fn every_shard_gets_ready_before_the_client() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        let identify = connection.recv().await.unwrap();
        connection.ready(&format!("session-{}", identify["d"]["shard"][0]), 1).await;
        connection.idle().await;
    })
    .await;

    // Shard count & gateway url come from the api
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v10/gateway/bot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": url,
            "shards": 3,
            "session_start_limit": { "total": 1000, "remaining": 1000, "reset_after": 0, "max_concurrency": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut bot = bot(&url, 1);
    bot.sharding_option = ShardingOption::Automatic;
    bot.gateway_url = None;
    bot.api_url = format!("{}/api", server.uri());

    let client = bot.elevate().await.unwrap();
    assert_eq!(client.shard_total(), 3);
    let mut events = client.subscribe();

    let mut ready_at = Vec::new();
    let mut shard_ids = Vec::new();
    loop {
        let event = next_event(&mut events, |event| matches!(event, Event::ShardReady | Event::Ready)).await;
        match event.event {
            Event::ShardReady => {
                shard_ids.push(event.shard_id);
                ready_at.push(Instant::now());
            }
            _ => break,
        }
    }

    assert_eq!(shard_ids, vec![0, 1, 2]);
    assert!(ready_at[1] - ready_at[0] >= Duration::from_millis(200));
    assert!(ready_at[2] - ready_at[1] >= Duration::from_millis(200));

    let mut identified = Vec::new();
    while let Ok((_, payload)) = received.try_recv() {
        if payload["op"] == 2 {
            identified.push(payload["d"]["shard"].clone());
        }
    }
    assert_eq!(identified, vec![json!([0, 3]), json!([1, 3]), json!([2, 3])]);

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn lost_connection_resumes_the_session() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        match connection.index {
            0 => {
                connection.recv().await;
                connection.ready("session-to-resume", 1).await;
                connection.dispatch("GUILD_CREATE", 5, json!({ "id": "1", "name": "guild" })).await;
                connection.close(4000, "Unknown error").await;
            }
            _ => {
                connection.recv().await;
                connection.dispatch("RESUMED", 6, json!({})).await;
                connection.idle().await;
            }
        }
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();
    let mut events = client.subscribe();

    next_event(&mut events, |event| matches!(event, Event::GuildCreate(_))).await;
    next_event(&mut events, |event| matches!(event, Event::Resumed)).await;

    let (index, resume) = next_received(&mut received, op(6)).await;
    assert_eq!(index, 1);
    assert_eq!(resume["d"]["session_id"], "session-to-resume");
    assert_eq!(resume["d"]["seq"], 5);
    assert_eq!(resume["d"]["token"], "token");

    // The guild survives the reconnect
    assert!(client.cache().read().await.guild(Snowflake(1)).is_some());

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_session_identifies_again() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        connection.recv().await;
        connection.send(json!({ "op": 9, "d": false })).await;
        connection.recv().await;
        connection.ready("fresh-session", 1).await;
        connection.idle().await;
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();
    let mut events = client.subscribe();

    next_event(&mut events, |event| matches!(event, Event::ShardReady)).await;

    let (first, _) = next_received(&mut received, op(2)).await;
    let (second, _) = next_received(&mut received, op(2)).await;
    assert_eq!((first, second), (0, 0));

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn resumable_invalid_session_still_identifies() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        match connection.index {
            0 => {
                connection.recv().await;
                connection.ready("first-session", 1).await;
                connection.close(4000, "Unknown error").await;
            }
            _ => {
                connection.recv().await;
                connection.send(json!({ "op": 9, "d": true })).await;
                connection.recv().await;
                connection.ready("second-session", 1).await;
                connection.idle().await;
            }
        }
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();

    let (index, resume) = next_received(&mut received, op(6)).await;
    assert_eq!((index, &resume["d"]["session_id"]), (1, &json!("first-session")));

    // The answer to the invalid session on the second connection is an identify, never another resume
    let (index, answer) = next_received(&mut received, |payload| payload["op"] == 2 || payload["op"] == 6).await;
    assert_eq!(index, 1);
    assert_eq!(answer["op"], 2);
    assert_eq!(answer["d"]["shard"], json!([0, 1]));

    let shard = client.shard(0).await.unwrap();
    timeout(WAIT, shard.wait_for(ShardStatus::Ready)).await.unwrap().unwrap();

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn shard_stays_responsive_while_waiting_to_identify() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(100).await;
        connection.recv().await;
        connection.send(json!({ "op": 9, "d": false })).await;
        connection.idle().await;
    })
    .await;

    // The wait after the invalid session is at least 30 seconds
    let mut bot = bot(&url, 1);
    bot.reconnect_delay = Duration::from_secs(30);
    let client = bot.elevate().await.unwrap();

    next_received(&mut received, op(2)).await;

    // Heartbeats keep being acknowledged, so the connection is not dropped as a zombie
    tokio::time::sleep(Duration::from_millis(600)).await;
    let (_, heartbeat) = next_received(&mut received, op(1)).await;
    assert!(heartbeat["d"].is_null());

    let started = Instant::now();
    client.shutdown();
    timeout(Duration::from_secs(2), client.closed()).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    // One connection & a single identify
    while let Ok((index, payload)) = received.try_recv() {
        assert_eq!(index, 0);
        assert_ne!(payload["op"], 2);
    }
}

#[tokio::test]
async fn heartbeats_carry_the_last_sequence() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(100).await;
        connection.recv().await;
        connection.ready("session", 41).await;
        connection.idle().await;
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();
    let mut events = client.subscribe();
    next_event(&mut events, |event| matches!(event, Event::ShardReady)).await;

    let (_, heartbeat) = next_received(&mut received, |payload| payload["op"] == 1 && payload["d"] == 41).await;
    assert_eq!(heartbeat["d"], 41);

    // Acknowledged heartbeats keep the connection alive
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.shard(0).await.unwrap().status(), ShardStatus::Ready);

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn gateway_requested_heartbeat_is_sent_immediately() {
    let (url, mut received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        connection.recv().await;
        connection.ready("session", 3).await;
        connection.send(json!({ "op": 1, "d": null })).await;
        connection.idle().await;
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();
    let started = Instant::now();
    let (_, heartbeat) = next_received(&mut received, |payload| payload["op"] == 1 && payload["d"] == 3).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(heartbeat["d"], 3);

    client.shutdown();
    timeout(WAIT, client.closed()).await.unwrap().unwrap();
}

#[tokio::test]
async fn authentication_failure_closes_the_client() {
    let (url, _received) = mock_gateway(|mut connection| async move {
        connection.hello(45_000).await;
        connection.recv().await;
        connection.close(4004, "Authentication failed.").await;
        connection.idle().await;
    })
    .await;

    let client = bot(&url, 1).elevate().await.unwrap();

    match timeout(WAIT, client.closed()).await.unwrap() {
        Err(Error::AuthenticationFailed { shard_id, code, reason }) => {
            assert_eq!(shard_id, 0);
            assert_eq!(code, 4004);
            assert_eq!(reason, "Authentication failed.");
        }
        other => panic!("expected the shard to be refused, got {other:?}"),
    }
    assert_eq!(client.shard(0).await.unwrap().status(), ShardStatus::Closed);
}
