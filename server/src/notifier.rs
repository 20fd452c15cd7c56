use crate::redis_keys::RedisKeys;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::RoomEvent;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

/// The event fan-out collaborator. The core publishes; the delivery layer
/// (websocket gateways, push services) subscribes and forwards.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event to everyone connected to a room.
    async fn publish_room(&self, room_id: i32, event: &RoomEvent) -> Result<()>;
    /// Deliver an event to a single user's connections.
    async fn publish_user(&self, user_id: i32, event: &RoomEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisNotifier {
    redis: ConnectionManager,
}

impl RedisNotifier {
    pub fn new(redis: ConnectionManager) -> Self {
        RedisNotifier { redis }
    }

    async fn publish(&self, channel: String, event: &RoomEvent) -> Result<()> {
        let data = serde_json::to_vec(event).context("Failed to serialize room event")?;
        let _: () = self
            .redis
            .clone()
            .publish(&channel, data)
            .await
            .context("Failed to publish room event")?;
        debug!("Published event to channel {}", channel);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish_room(&self, room_id: i32, event: &RoomEvent) -> Result<()> {
        self.publish(RedisKeys::room_channel(room_id), event).await
    }

    async fn publish_user(&self, user_id: i32, event: &RoomEvent) -> Result<()> {
        self.publish(RedisKeys::user_channel(user_id), event).await
    }
}
