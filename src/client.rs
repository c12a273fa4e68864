use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, Receiver as GatewayStreamReciever, Sender as GatewayStreamSender};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::bot::{Bot, ShardingOption};
use crate::cache::{Cache, SharedCache};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::gateway::{gateway_query_url, GatewayEvent, Shard, ShardHandle, ShardSignal};
use crate::gateway_structs::PresenceUpdate;
use crate::model::Snowflake;
use crate::rest::RestClient;

/// An Arc RwLock hashmap utilised for accessing the handles of started shards, key: shard_id
pub type ShardMap = Arc<RwLock<HashMap<u32, ShardHandle>>>;

/// Everything a shard needs which is the same for every shard of a client.
#[derive(Clone)]
struct ShardSettings {
    shard_total: u32,
    gateway_url: String,
    token: Arc<str>,
    intents: u32,
    reconnect_delay: Duration,
    cache: SharedCache,
    events: GatewayStreamSender<GatewayEvent>,
    signals: UnboundedSender<ShardSignal>,
}

/// Messages to the coordinator besides the ones from shards.
#[derive(Debug)]
enum CoordinatorCommand {
    Shutdown,
}

/// Represents the client which acts as a connection between the Discord api & a [`Bot`]
/// Owns the cache, the rest client & every shard, nothing of it is global.
pub struct DiscordClient {

    /// The [`Bot`] accociated with this client.
    pub bot: Bot,

    rest: RestClient,

    cache: SharedCache,

    /// A [`HashMap`] of all started gateway connections where key: shard_id & value: handle of the shard
    shards: ShardMap,

    shard_total: u32,

    events: GatewayStreamSender<GatewayEvent>,

    /// Subscribed before any shard started, handed out by the first call to [`DiscordClient::subscribe`].
    first_subscriber: StdMutex<Option<GatewayStreamReciever<GatewayEvent>>>,

    commands: UnboundedSender<CoordinatorCommand>,

    coordinator: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl DiscordClient {

    /// Resolves the gateway & starts shard 0, the remaining shards follow one after another.
    pub async fn connect(bot: Bot) -> Result<Self> {

        // Create the RestClient to be able to request data from the Discord Api.
        let rest = RestClient::with_api_url(&bot.api_url, Some(&bot.token))?;

        // Get amount of shards to use and the url to connect them to.
        let (url, shard_total) = match (bot.sharding_option, bot.gateway_url.clone()) {
            (ShardingOption::SetAmount(_), Some(url)) => (url, bot.shard_amount(0)?),
            (ShardingOption::SetAmount(_), None) => (rest.get_gateway().await?.url, bot.shard_amount(0)?),
            (ShardingOption::Automatic, gateway_url) => {
                let gateway_bot = rest.get_gateway_bot().await?;
                if let Some(limit) = gateway_bot.session_start_limit {
                    debug!(remaining = limit.remaining_sessions, total = limit.total_sessions, "Session start limit");
                }
                (gateway_url.unwrap_or(gateway_bot.url), bot.shard_amount(gateway_bot.shards)?)
            }
        };

        let gateway_url = gateway_query_url(&url);
        info!(%gateway_url, shard_total, "Starting shards");

        let cache = Cache::new(bot.message_limit).shared();
        let (events, first_subscriber) = broadcast::channel(bot.event_capacity.max(1));
        let (signals_sender, signals) = mpsc::unbounded_channel();
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let shards: ShardMap = Arc::new(RwLock::new(HashMap::new()));

        let settings = ShardSettings {
            shard_total,
            gateway_url,
            token: Arc::from(bot.token.as_str()),
            intents: bot.intents.bits(),
            reconnect_delay: bot.reconnect_delay,
            cache: cache.clone(),
            events: events.clone(),
            signals: signals_sender,
        };

        // Shards are started one after another, so this runs as a task to not block the caller on the later shards.
        let coordinator = tokio::spawn(coordinate(
            shards.clone(),
            settings,
            bot.identify_delay,
            signals,
            command_receiver,
        ));

        Ok(Self {
            bot,
            rest,
            cache,
            shards,
            shard_total,
            events,
            first_subscriber: StdMutex::new(Some(first_subscriber)),
            commands,
            coordinator: Mutex::new(Some(coordinator)),
        })
    }

    /// A receiver for every event of every shard.
    /// The first receiver handed out sees every event since the client started, later ones start at the time they subscribed.
    pub fn subscribe(&self) -> GatewayStreamReciever<GatewayEvent> {
        let first = self.first_subscriber
            .lock()
            .ok()
            .and_then(|mut first| first.take());

        first.unwrap_or_else(|| self.events.subscribe())
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn shards(&self) -> &ShardMap {
        &self.shards
    }

    /// The amount of shards this client runs once every shard started.
    pub fn shard_total(&self) -> u32 {
        self.shard_total
    }

    pub async fn shard(&self, shard_id: u32) -> Option<ShardHandle> {
        self.shards.read().await.get(&shard_id).cloned()
    }

    /// The shard which receives the events of a guild.
    pub fn shard_id_for(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_id(self.shard_total)
    }

    /// Sets the presence of the bot on every started shard.
    pub async fn update_presence(&self, presence: PresenceUpdate) -> Result<()> {
        let handles: Vec<ShardHandle> = self.shards.read().await.values().cloned().collect();
        for handle in handles {
            handle.update_presence(presence.clone()).await?;
        }
        Ok(())
    }

    /// Stops every shard, no shard is started after this.
    pub fn shutdown(&self) {
        let _ = self.commands.send(CoordinatorCommand::Shutdown);
    }

    /// Waits until every shard stopped.
    /// Fails with the error of a shard the gateway refused, which stops every other shard as well.
    pub async fn closed(&self) -> Result<()> {
        let coordinator = self.coordinator.lock().await.take();
        match coordinator {
            Some(coordinator) => coordinator.await.map_err(|_| Error::ClientClosed)?,
            None => Ok(()),
        }
    }
}

#[async_trait]
/// Trait which exists so we can add a method which will add a new shard to a [`ShardMap`]
trait NewShardToMap {

    /// Starts a new shard & adds its handle to this [`ShardMap`]
    async fn add_shard_to_map(&self, shard_id: u32, settings: &ShardSettings);
}

#[async_trait]
impl NewShardToMap for ShardMap {
    async fn add_shard_to_map(&self, shard_id: u32, settings: &ShardSettings) {
        let settings = settings.clone();
        let shard = Shard::new(
            shard_id,
            settings.shard_total,
            settings.gateway_url,
            settings.token,
            settings.intents,
            settings.reconnect_delay,
            settings.cache,
            settings.events,
            settings.signals,
        );

        let (handle, commands) = shard.handle();

        // Gain the write guard to our shard_map so we can add this shard to it.
        self.write().await.insert(shard_id, handle);

        // Spawn the shard, it keeps itself connected from now on
        tokio::spawn(shard.run(commands));
    }
}

/// Starts shards one at a time: shard `n + 1` identifies `identify_delay` after shard `n` became ready.
/// Ends once every started shard stopped, or with the error of a refused shard.
async fn coordinate(
    shards: ShardMap,
    settings: ShardSettings,
    identify_delay: Duration,
    mut signals: UnboundedReceiver<ShardSignal>,
    mut commands: UnboundedReceiver<CoordinatorCommand>,
) -> Result<()> {
    let shard_total = settings.shard_total;
    let events = settings.events.clone();

    shards.add_shard_to_map(0, &settings).await;
    let mut started = 1;
    let mut ready = 0;
    let mut closed = 0;
    let mut shutting_down = false;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(ShardSignal::Ready(shard_id)) => {
                    ready += 1;
                    info!(shard_id, ready, shard_total, "Shard is ready");

                    if ready == shard_total {
                        let _ = events.send(GatewayEvent { shard_id, event: Event::Ready });
                    }

                    if started < shard_total && !shutting_down {
                        sleep(identify_delay).await;
                        shards.add_shard_to_map(started, &settings).await;
                        started += 1;
                    }
                }
                Some(ShardSignal::Closed(shard_id)) => {
                    closed += 1;
                    debug!(shard_id, closed, started, "Shard stopped");
                    if closed == started {
                        return Ok(());
                    }
                }
                Some(ShardSignal::Fatal(error)) => {
                    warn!(%error, "Stopping every shard");
                    shutdown_shards(&shards).await;
                    return Err(error);
                }
                // The coordinator holds a sender itself
                None => return Ok(()),
            },

            command = commands.recv(), if !shutting_down => match command {
                Some(CoordinatorCommand::Shutdown) | None => {
                    info!("Shutting down every shard");
                    shutting_down = true;
                    shutdown_shards(&shards).await;
                }
            },
        }
    }
}

async fn shutdown_shards(shards: &ShardMap) {
    let handles: Vec<ShardHandle> = shards.read().await.values().cloned().collect();
    for handle in handles {
        handle.shutdown().await;
    }
}
