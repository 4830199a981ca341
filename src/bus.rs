//! Broadcast bus. Rooms are logical, addressable by convention
//! (`user:`, `character:`, `zone:`, `combat:`, `guild:`, `global:*`). Local
//! delivery runs over a `tokio::sync::broadcast` channel; a publish
//! additionally goes out over a Redis pub/sub channel so every replica's
//! local subscribers receive it. Delivery is at-most-once and unordered
//! across publishers — payloads that need ordering carry their own sequence
//! number (turn number, movement timestamp).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Character(String),
    Zone(String),
    Combat(String),
    Guild(String),
    GlobalChat,
    GlobalEvents,
}

impl Room {
    pub fn as_key(&self) -> String {
        match self {
            Room::User(id) => format!("user:{id}"),
            Room::Character(id) => format!("character:{id}"),
            Room::Zone(id) => format!("zone:{id}"),
            Room::Combat(id) => format!("combat:{id}"),
            Room::Guild(id) => format!("guild:{id}"),
            Room::GlobalChat => "global:chat".to_string(),
            Room::GlobalEvents => "global:events".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub room: String,
    pub event_name: String,
    pub payload: serde_json::Value,
}

pub struct BroadcastBus {
    local: broadcast::Sender<BusEnvelope>,
    redis_channel: Option<String>,
    redis_client: Option<redis::Client>,
}

const REDIS_FANOUT_CHANNEL: &str = "realmkeep:bus";

impl BroadcastBus {
    pub fn new_local_only() -> Self {
        let (local, _) = broadcast::channel(4096);
        Self { local, redis_channel: None, redis_client: None }
    }

    /// Attach a Redis pub/sub transport so publishes reach every replica's
    /// local subscribers, not just this process's.
    pub fn with_redis(redis_url: &str) -> redis::RedisResult<Self> {
        let (local, _) = broadcast::channel(4096);
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            local,
            redis_channel: Some(REDIS_FANOUT_CHANNEL.to_string()),
            redis_client: Some(client),
        })
    }

    /// Spawn a task that subscribes to the Redis channel and re-publishes
    /// every message into this replica's local broadcast channel. Called
    /// once at startup, before the bus is handed to route state.
    pub fn spawn_redis_subscriber(&self) {
        let (Some(client), Some(channel)) = (self.redis_client.clone(), self.redis_channel.clone()) else {
            return;
        };
        let local = self.local.clone();
        tokio::spawn(async move {
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if pubsub.subscribe(&channel).await.is_err() {
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        use futures_util::StreamExt;
                        while let Some(msg) = stream.next().await {
                            if let Ok(payload) = msg.get_payload::<String>() {
                                if let Ok(envelope) = serde_json::from_str::<BusEnvelope>(&payload) {
                                    let _ = local.send(envelope);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bus: redis pubsub connection failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.local.subscribe()
    }

    /// Publish to a room. Always fans out locally; additionally pushes to
    /// Redis so other replicas' subscribers see it too.
    pub fn publish(&self, room: &Room, event_name: &str, payload: serde_json::Value) {
        let envelope = BusEnvelope { room: room.as_key(), event_name: event_name.to_string(), payload };
        let _ = self.local.send(envelope.clone());

        if let (Some(client), Some(channel)) = (&self.redis_client, &self.redis_channel) {
            let client = client.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                    if let Ok(serialized) = serde_json::to_string(&envelope) {
                        let _: redis::RedisResult<()> = redis::AsyncCommands::publish(&mut conn, channel, serialized).await;
                    }
                }
            });
        }
    }
}
