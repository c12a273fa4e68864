//! One shard: a single gateway connection which is kept alive, resumed & re-identified for the lifetime of the client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast::Sender as GatewayStreamSender;
use tokio::sync::mpsc::{self, Receiver as ShardCommandReceiver, Sender as GatewaySinkSender, UnboundedSender};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::Error;
use crate::events::{self, Event, EventName};
use crate::gateway_structs::*;
use crate::websocket::{self, process_gateway_send_commands, DeserializeRecievePayload, GatewayFrame, ReadSplitStream};
use crate::DISCORD_API_VERSION;

/// Close codes after which the shard must not reconnect.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Close codes after which the session can't be resumed.
const SESSION_CLOSE_CODES: [u16; 2] = [4007, 4009];

/// Close code sent when we drop a connection on purpose but want to resume its session later.
const RECONNECT_CLOSE_CODE: u16 = 4000;

/// Close code sent when the shard shuts down for good.
const NORMAL_CLOSE_CODE: u16 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Where a shard is in its connection lifecycle.
pub enum ShardStatus {

    /// Opening the websocket & waiting for Hello.
    Connecting,

    /// Identify sent, waiting for READY.
    Identifying,

    /// Resume sent, waiting for RESUMED.
    Resuming,

    /// Receiving events.
    Ready,

    /// The connection was lost, waiting before the next attempt.
    Reconnecting,

    /// The shard stopped and won't connect again.
    Closed,
}

#[derive(Clone, Debug)]
/// An event together with the shard which received it.
pub struct GatewayEvent {
    pub shard_id: u32,
    pub event: Event,
}

#[derive(Debug)]
/// Commands a shard's sink channel processes & sends through the gateway.
pub enum GatewayCommand {
    Heartbeat(Payload<Option<u64>>),
    Identify(Payload<Identify>),
    Resume(Payload<Resume>),
    PresenceUpdate(Payload<PresenceUpdate>),

    /// Sends a close frame with this code & ends the connection.
    Close(u16),
}

impl GatewayCommand {

    /// Serializes the payload of this command, closes are handled by the sink itself.
    pub fn into_message(self) -> serde_json::Result<tokio_tungstenite::tungstenite::Message> {
        match self {
            Self::Heartbeat(payload) => payload.serialize_to_message(),
            Self::Identify(payload) => payload.serialize_to_message(),
            Self::Resume(payload) => payload.serialize_to_message(),
            Self::PresenceUpdate(payload) => payload.serialize_to_message(),
            Self::Close(_) => Ok(tokio_tungstenite::tungstenite::Message::Close(None)),
        }
    }
}

#[derive(Debug)]
/// Requests from the user of the library to a running shard.
pub enum ShardCommand {
    UpdatePresence(PresenceUpdate),
    Shutdown,
}

#[derive(Debug)]
/// What a shard reports to the client coordinating the shards.
pub(crate) enum ShardSignal {

    /// The shard received READY for the first time.
    Ready(u32),

    /// The shard stopped after being told to.
    Closed(u32),

    /// The shard was refused by the gateway & stopped.
    Fatal(Error),
}

#[derive(Clone, Debug)]
/// A handle on a running shard, used to observe it & send commands to it.
pub struct ShardHandle {
    shard_id: u32,
    commands: mpsc::Sender<ShardCommand>,
    status: watch::Receiver<ShardStatus>,
}

impl ShardHandle {

    pub fn id(&self) -> u32 {
        self.shard_id
    }

    /// The current status of the shard.
    pub fn status(&self) -> ShardStatus {
        *self.status.borrow()
    }

    /// Waits until the shard reaches `status`, fails if the shard stopped before.
    pub async fn wait_for(&self, status: ShardStatus) -> crate::error::Result<()> {
        let mut receiver = self.status.clone();
        loop {
            let current = *receiver.borrow_and_update();
            if current == status {
                return Ok(());
            }
            if current == ShardStatus::Closed {
                return Err(Error::ClientClosed);
            }
            receiver.changed().await.map_err(|_| Error::ClientClosed)?;
        }
    }

    /// Sets the presence of the bot on this shard (opcode 3).
    pub async fn update_presence(&self, presence: PresenceUpdate) -> crate::error::Result<()> {
        self.commands
            .send(ShardCommand::UpdatePresence(presence))
            .await
            .map_err(|_| Error::ClientClosed)
    }

    /// Closes the connection of this shard, it won't reconnect.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(ShardCommand::Shutdown).await;
    }
}

#[derive(Clone, Debug)]
/// Id & resume url of the session a shard can resume.
struct Session {
    id: String,
    resume_url: Option<String>,
}

/// How a connection ended.
enum Disconnect {

    /// Connect again after the delay, resuming when a session is left.
    Reconnect(Duration),

    /// The shard was told to stop.
    Shutdown,

    /// The gateway refused the shard.
    Fatal(Error),
}

/// What the receive loop does after handling a payload.
enum Followup {

    /// End the connection.
    Disconnect(Disconnect),

    /// Identify again on the same socket once the delay passed.
    Identify(Duration),
}

/// The state of one shard, owned by the task running it. Only that task ever changes it.
pub(crate) struct Shard {
    pub shard_id: u32,
    pub shard_total: u32,

    /// Gateway url including the version & encoding query.
    pub gateway_url: String,
    pub token: Arc<str>,
    pub intents: u32,
    pub reconnect_delay: Duration,

    pub cache: SharedCache,
    pub events: GatewayStreamSender<GatewayEvent>,
    pub signals: UnboundedSender<ShardSignal>,

    session: Option<Session>,

    /// Last sequence number received, 0 while none was received.
    sequence: Arc<AtomicU64>,

    status: watch::Sender<ShardStatus>,

    /// The coordinator was already told about the first READY.
    ready_signalled: bool,
}

impl Shard {

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard_id: u32,
        shard_total: u32,
        gateway_url: String,
        token: Arc<str>,
        intents: u32,
        reconnect_delay: Duration,
        cache: SharedCache,
        events: GatewayStreamSender<GatewayEvent>,
        signals: UnboundedSender<ShardSignal>,
    ) -> Self {
        let (status, _) = watch::channel(ShardStatus::Connecting);
        Self {
            shard_id,
            shard_total,
            gateway_url,
            token,
            intents,
            reconnect_delay,
            cache,
            events,
            signals,
            session: None,
            sequence: Arc::new(AtomicU64::new(0)),
            status,
            ready_signalled: false,
        }
    }

    /// Creates the handle for this shard together with the receiving end of its commands.
    pub fn handle(&self) -> (ShardHandle, ShardCommandReceiver<ShardCommand>) {
        let (commands, receiver) = mpsc::channel(16);
        let handle = ShardHandle {
            shard_id: self.shard_id,
            commands,
            status: self.status.subscribe(),
        };
        (handle, receiver)
    }

    /// Keeps the shard connected until it is shut down or refused by the gateway.
    pub async fn run(mut self, mut commands: ShardCommandReceiver<ShardCommand>) {
        loop {
            let delay = match self.connection(&mut commands).await {
                Ok(Disconnect::Reconnect(delay)) => delay,
                Ok(Disconnect::Shutdown) => {
                    info!(shard_id = self.shard_id, "Shard shut down");
                    self.set_status(ShardStatus::Closed);
                    let _ = self.signals.send(ShardSignal::Closed(self.shard_id));
                    return;
                }
                Ok(Disconnect::Fatal(error)) => {
                    warn!(shard_id = self.shard_id, %error, "Shard was refused by the gateway");
                    self.set_status(ShardStatus::Closed);
                    let _ = self.signals.send(ShardSignal::Fatal(error));
                    return;
                }
                Err(error) => {
                    warn!(shard_id = self.shard_id, error = ?error, "Gateway connection failed");
                    self.reconnect_delay
                }
            };

            self.set_status(ShardStatus::Reconnecting);
            info!(shard_id = self.shard_id, resume = self.session.is_some(), ?delay, "Reconnecting to the gateway");

            // Wait, but stay responsive to shutdowns in the meantime
            let wait = sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    command = commands.recv() => match command {
                        Some(ShardCommand::UpdatePresence(_)) => debug!(shard_id = self.shard_id, "Dropping presence update while disconnected"),
                        Some(ShardCommand::Shutdown) | None => {
                            self.set_status(ShardStatus::Closed);
                            let _ = self.signals.send(ShardSignal::Closed(self.shard_id));
                            return;
                        }
                    },
                }
            }
        }
    }

    /// One websocket connection from connecting until it ends.
    async fn connection(&mut self, commands: &mut ShardCommandReceiver<ShardCommand>) -> Result<Disconnect> {
        self.set_status(ShardStatus::Connecting);

        let url = match self.session.as_ref().and_then(|session| session.resume_url.as_deref()) {
            Some(resume_url) => gateway_query_url(resume_url),
            None => self.gateway_url.clone(),
        };
        info!(shard_id = self.shard_id, %url, "Connecting to the Discord Gateway");

        let (write_sink, mut read_stream) = websocket::connect(&url).await
            .context("Failed to connect to the Discord Gateway")?;

        // Create the sender and reciever utilised for sending commands through the gateway.
        let (sink_sender, sink_receiver) = mpsc::channel(32);
        tokio::spawn(process_gateway_send_commands(sink_receiver, write_sink));

        // Get the Hello payload send from discord.
        let hello = read_stream.read_deserialize_next_payload::<Payload<Hello>>().await
            .context("Failed to recieve Hello Payload from Discord Gateway")?;

        self.handshake(&sink_sender).await?;

        // Spawn the function which will keep sending heartbeats to Discords gateway.
        let acknowledged = Arc::new(AtomicBool::new(true));
        let zombie = Arc::new(Notify::new());
        let heartbeat = tokio::spawn(heartbeat(
            self.shard_id,
            Duration::from_millis(hello.data.heartbeat_interval),
            self.sequence.clone(),
            acknowledged.clone(),
            zombie.clone(),
            sink_sender.clone(),
        ));

        let disconnect = self.receive(&mut read_stream, &sink_sender, commands, &acknowledged, &zombie).await;

        // Never heartbeat on a dead socket
        heartbeat.abort();

        disconnect
    }

    /// Sends Resume when a session is left, Identify otherwise.
    async fn handshake(&mut self, sink: &GatewaySinkSender<GatewayCommand>) -> Result<()> {
        let command = match &self.session {
            Some(session) => {
                self.set_status(ShardStatus::Resuming);
                let seq = self.sequence.load(Ordering::Acquire);
                debug!(shard_id = self.shard_id, session_id = %session.id, seq, "Resuming session");
                GatewayCommand::Resume(Payload::new(OpCode::Resume, Resume {
                    token: self.token.clone(),
                    session_id: session.id.clone(),
                    seq,
                }))
            }
            None => {
                self.set_status(ShardStatus::Identifying);
                self.sequence.store(0, Ordering::Release);
                debug!(shard_id = self.shard_id, shard_total = self.shard_total, "Identifying");
                GatewayCommand::Identify(Payload::new(OpCode::Identify, Identify {
                    token: self.token.clone(),
                    connection_properties: IdentifyConnectionProperties::default(),
                    shard: [self.shard_id, self.shard_total],
                    intents: self.intents,
                }))
            }
        };

        sink.send(command).await.context("Gateway sink closed before the handshake")
    }

    async fn receive(
        &mut self,
        read_stream: &mut ReadSplitStream,
        sink: &GatewaySinkSender<GatewayCommand>,
        commands: &mut ShardCommandReceiver<ShardCommand>,
        acknowledged: &AtomicBool,
        zombie: &Notify,
    ) -> Result<Disconnect> {
        // Armed by an invalid session, frames & commands keep being handled while it runs
        let identify = sleep(Duration::ZERO);
        tokio::pin!(identify);
        let mut identify_pending = false;

        loop {
            tokio::select! {
                _ = &mut identify, if identify_pending => {
                    identify_pending = false;
                    self.handshake(sink).await?;
                }

                frame = read_stream.read_next_frame() => match frame? {
                    GatewayFrame::Payload(payload) => match self.handle_payload(payload, sink, acknowledged).await? {
                        Some(Followup::Disconnect(disconnect)) => return Ok(disconnect),
                        Some(Followup::Identify(delay)) => {
                            identify.as_mut().reset(Instant::now() + delay);
                            identify_pending = true;
                        }
                        None => {}
                    },
                    GatewayFrame::Closed { code, reason } => return Ok(self.closed(code, reason)),
                },

                _ = zombie.notified() => {
                    warn!(shard_id = self.shard_id, "Heartbeat was not acknowledged, connection is a zombie");
                    let _ = sink.send(GatewayCommand::Close(RECONNECT_CLOSE_CODE)).await;
                    return Ok(Disconnect::Reconnect(self.reconnect_delay));
                }

                command = commands.recv() => match command {
                    Some(ShardCommand::UpdatePresence(presence)) => {
                        sink.send(GatewayCommand::PresenceUpdate(Payload::new(OpCode::PresenceUpdate, presence))).await
                            .context("Gateway sink closed")?;
                    }
                    Some(ShardCommand::Shutdown) | None => {
                        let _ = sink.send(GatewayCommand::Close(NORMAL_CLOSE_CODE)).await;
                        return Ok(Disconnect::Shutdown);
                    }
                },
            }
        }
    }

    async fn handle_payload(&mut self, payload: RawPayload, sink: &GatewaySinkSender<GatewayCommand>, acknowledged: &AtomicBool) -> Result<Option<Followup>> {
        match payload.op() {
            OpCode::Dispatch => {
                if let Some(sequence) = payload.sequence_number {
                    self.sequence.store(sequence, Ordering::Release);
                }
                self.dispatch(payload.event_name.as_deref(), payload.data).await;
            }

            OpCode::Heartbeat => {
                debug!(shard_id = self.shard_id, "Gateway requested a heartbeat");
                let heartbeat = Payload::new(OpCode::Heartbeat, last_sequence(&self.sequence));
                sink.send(GatewayCommand::Heartbeat(heartbeat)).await.context("Gateway sink closed")?;
            }

            OpCode::HeartbeatAck => {
                debug!(shard_id = self.shard_id, "Heartbeat acknowledged");
                acknowledged.store(true, Ordering::Release);
            }

            OpCode::Reconnect => {
                info!(shard_id = self.shard_id, "Gateway requested a reconnect");
                let _ = sink.send(GatewayCommand::Close(RECONNECT_CLOSE_CODE)).await;
                return Ok(Some(Followup::Disconnect(Disconnect::Reconnect(Duration::ZERO))));
            }

            OpCode::InvalidSession => {
                // Always answered with a fresh identify, even when the gateway calls the session resumable
                let resumable = payload.data.as_bool().unwrap_or(false);
                warn!(shard_id = self.shard_id, resumable, "Session was invalidated");
                self.session = None;

                // A random time between one & five reconnect delays
                let delay = self.reconnect_delay.mul_f32(1.0 + 4.0 * rand::random::<f32>());
                return Ok(Some(Followup::Identify(delay)));
            }

            other => debug!(shard_id = self.shard_id, opcode = ?other, "Ignoring unexpected opcode"),
        }

        Ok(None)
    }

    /// Applies a dispatch to the shard state & the cache, then emits its event.
    async fn dispatch(&mut self, event_name: Option<&str>, data: Value) {
        let name = match event_name.and_then(EventName::from_wire) {
            Some(name) => name,
            None => {
                debug!(shard_id = self.shard_id, event = event_name.unwrap_or_default(), "Ignoring unhandled dispatch");
                return;
            }
        };

        match name {
            EventName::Ready => match Ready::deserialize(&data) {
                Ok(ready) => {
                    info!(shard_id = self.shard_id, session_id = %ready.session_id, user = %ready.user.username, "Shard is ready");
                    self.session = Some(Session {
                        id: ready.session_id,
                        resume_url: ready.resume_gateway_url,
                    });
                    self.set_status(ShardStatus::Ready);
                }
                Err(error) => warn!(shard_id = self.shard_id, %error, "Received a malformed READY"),
            },
            EventName::Resumed => {
                info!(shard_id = self.shard_id, "Shard resumed its session");
                self.set_status(ShardStatus::Ready);
            }
            _ => {}
        }

        let event = {
            let mut cache = self.cache.write().await;
            events::handle(&mut cache, name, &data, self.shard_id)
        };

        if let Some(event) = event {
            self.emit(event);
        }

        match name {
            EventName::Ready => {
                self.emit(Event::ShardReady);
                if !self.ready_signalled {
                    self.ready_signalled = true;
                    let _ = self.signals.send(ShardSignal::Ready(self.shard_id));
                }
            }
            EventName::Resumed => self.emit(Event::Resumed),
            _ => {}
        }
    }

    /// Decides what happens after the gateway closed the connection.
    fn closed(&mut self, code: Option<u16>, reason: String) -> Disconnect {
        warn!(shard_id = self.shard_id, ?code, %reason, "Gateway closed the connection");

        match code {
            Some(code) if FATAL_CLOSE_CODES.contains(&code) => Disconnect::Fatal(Error::AuthenticationFailed {
                shard_id: self.shard_id,
                code,
                reason,
            }),
            Some(code) if SESSION_CLOSE_CODES.contains(&code) => {
                self.session = None;
                Disconnect::Reconnect(self.reconnect_delay)
            }
            _ => Disconnect::Reconnect(self.reconnect_delay),
        }
    }

    fn emit(&self, event: Event) {
        // Sending only fails while nobody is subscribed
        let _ = self.events.send(GatewayEvent {
            shard_id: self.shard_id,
            event,
        });
    }

    fn set_status(&self, status: ShardStatus) {
        self.status.send_replace(status);
    }
}

/// The url of a gateway with the query selecting the api version & JSON encoding.
pub fn gateway_query_url(url: &str) -> String {
    format!("{}/?v={DISCORD_API_VERSION}&encoding=json", url.trim_end_matches('/'))
}

fn last_sequence(sequence: &AtomicU64) -> Option<u64> {
    match sequence.load(Ordering::Acquire) {
        0 => None,
        sequence => Some(sequence),
    }
}

/// Send heartbeats through the current connection to keep it alive.
/// Flags the connection as a zombie when the previous heartbeat was never acknowledged.
async fn heartbeat(
    shard_id: u32,
    heartbeat_interval: Duration,
    sequence: Arc<AtomicU64>,
    acknowledged: Arc<AtomicBool>,
    zombie: Arc<Notify>,
    sink: GatewaySinkSender<GatewayCommand>,
) {
    // First heartbeat happens after heartbeat_interval * jitter
    // Jitter is a random value between 0 and 1.
    let jitter = rand::random::<f32>();

    // Sleep for the first heartbeat
    sleep(heartbeat_interval.mul_f32(jitter)).await;

    loop {
        if !acknowledged.swap(false, Ordering::AcqRel) {
            zombie.notify_one();
            return;
        }

        // Create the payload
        let heartbeat_payload = Payload::new(OpCode::Heartbeat, last_sequence(&sequence));
        debug!(shard_id, seq = ?heartbeat_payload.data, "Sending heartbeat");

        // Send it
        if sink.send(GatewayCommand::Heartbeat(heartbeat_payload)).await.is_err() {
            return;
        }

        // Wait for next heartbeat
        sleep(heartbeat_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use tokio::sync::broadcast;

    fn shard() -> (Shard, mpsc::UnboundedReceiver<ShardSignal>) {
        let (events, _) = broadcast::channel(16);
        let (signals, receiver) = mpsc::unbounded_channel();
        let shard = Shard::new(
            0,
            1,
            gateway_query_url("ws://127.0.0.1:1"),
            Arc::from("token"),
            0,
            Duration::from_millis(10),
            Cache::new(10).shared(),
            events,
            signals,
        );
        (shard, receiver)
    }

    #[test]
    fn gateway_urls_carry_the_query() {
        assert_eq!(gateway_query_url("wss://gateway.discord.gg/"), format!("wss://gateway.discord.gg/?v={DISCORD_API_VERSION}&encoding=json"));
    }

    #[test]
    fn close_codes_decide_the_reconnect() {
        let (mut shard, _signals) = shard();
        shard.session = Some(Session { id: "abc".into(), resume_url: None });

        assert!(matches!(shard.closed(Some(1001), String::new()), Disconnect::Reconnect(_)));
        assert!(shard.session.is_some());

        assert!(matches!(shard.closed(None, String::new()), Disconnect::Reconnect(_)));
        assert!(shard.session.is_some());

        assert!(matches!(shard.closed(Some(4009), "Session timed out".into()), Disconnect::Reconnect(_)));
        assert!(shard.session.is_none());

        for code in FATAL_CLOSE_CODES {
            match shard.closed(Some(code), "nope".into()) {
                Disconnect::Fatal(Error::AuthenticationFailed { shard_id, code: closed_with, .. }) => {
                    assert_eq!(shard_id, 0);
                    assert_eq!(closed_with, code);
                }
                _ => panic!("close code {code} must be fatal"),
            }
        }
    }

    #[tokio::test]
    async fn ready_stores_the_session_and_signals_once() {
        let (mut shard, mut signals) = shard();
        let mut events = shard.events.subscribe();
        let ready = serde_json::json!({
            "session_id": "session",
            "resume_gateway_url": "wss://resume.discord.gg",
            "user": { "id": "1", "username": "bot", "discriminator": "0000" }
        });

        shard.dispatch(Some("READY"), ready.clone()).await;
        shard.dispatch(Some("READY"), ready).await;

        assert_eq!(shard.session.as_ref().map(|session| session.id.as_str()), Some("session"));
        assert_eq!(*shard.status.borrow(), ShardStatus::Ready);
        assert!(matches!(signals.try_recv(), Ok(ShardSignal::Ready(0))));
        assert!(signals.try_recv().is_err());
        assert!(matches!(events.try_recv().map(|event| event.event), Ok(Event::ShardReady)));
        assert_eq!(shard.cache.read().await.user.as_ref().map(|user| user.username.as_str()), Some("bot"));
    }

    #[tokio::test]
    async fn invalid_session_always_drops_the_session() {
        let (mut shard, _signals) = shard();
        let (sink, mut sent) = mpsc::channel(4);
        let acknowledged = AtomicBool::new(true);

        for resumable in [true, false] {
            shard.session = Some(Session { id: "abc".into(), resume_url: None });
            let payload = Payload::new(OpCode::InvalidSession, Value::Bool(resumable));

            match shard.handle_payload(payload, &sink, &acknowledged).await.unwrap() {
                Some(Followup::Identify(delay)) => {
                    assert!(delay >= shard.reconnect_delay.mul_f32(0.99) && delay <= shard.reconnect_delay.mul_f32(5.01));
                }
                _ => panic!("an invalid session must lead to an identify"),
            }
            assert!(shard.session.is_none());
        }

        // Nothing is sent before the delay passed
        assert!(sent.try_recv().is_err());

        shard.handshake(&sink).await.unwrap();
        assert!(matches!(sent.try_recv(), Ok(GatewayCommand::Identify(_))));
    }

    #[test]
    fn sequence_zero_means_none() {
        let sequence = AtomicU64::new(0);
        assert_eq!(last_sequence(&sequence), None);
        sequence.store(7, Ordering::Release);
        assert_eq!(last_sequence(&sequence), Some(7));
    }
}
