use crate::db::models::Room;
use crate::redis_keys::RedisKeys;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{LIVE_GAME_TTL_SECONDS, LiveGame};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Storage seam for the ephemeral live-game record. The production
/// implementation is Redis; tests swap in an in-memory map.
#[async_trait]
pub trait LiveGameStore: Send + Sync {
    async fn get(&self, room_id: i32) -> Result<Option<LiveGame>>;
    async fn put(&self, room_id: i32, live: &LiveGame) -> Result<()>;
    async fn remove(&self, room_id: i32) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisLiveGameStore {
    redis: ConnectionManager,
}

impl RedisLiveGameStore {
    pub fn new(redis: ConnectionManager) -> Self {
        RedisLiveGameStore { redis }
    }
}

#[async_trait]
impl LiveGameStore for RedisLiveGameStore {
    async fn get(&self, room_id: i32) -> Result<Option<LiveGame>> {
        let json = self
            .redis
            .clone()
            .get::<_, Option<String>>(RedisKeys::live_game(room_id))
            .await
            .context("Failed to get live game json from Redis")?;
        match json {
            Some(json) => {
                let live = serde_json::from_str(&json)
                    .context("Failed to deserialize live game json from Redis")?;
                Ok(Some(live))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, room_id: i32, live: &LiveGame) -> Result<()> {
        self.redis
            .clone()
            .set_ex::<_, _, ()>(
                RedisKeys::live_game(room_id),
                serde_json::to_string(live)
                    .context("Failed to serialize live game to json for Redis")?,
                LIVE_GAME_TTL_SECONDS,
            )
            .await
            .context("Failed to put live game json to Redis with expiration")
    }

    async fn remove(&self, room_id: i32) -> Result<()> {
        self.redis
            .clone()
            .del::<_, ()>(RedisKeys::live_game(room_id))
            .await
            .context("Failed to remove live game from Redis")
    }
}

/// Read-through load of the cached record. A record that is absent or
/// structurally incomplete for the current participants is rebuilt from
/// the durable room, zero-initializing any missing per-player entries.
pub async fn load_or_init(store: &dyn LiveGameStore, room: &Room) -> Result<LiveGame> {
    let players = room.player_ids();
    if let Some(mut live) = store.get(room.id).await? {
        if live.is_complete_for(&players) {
            return Ok(live);
        }
        for &player in &players {
            if !live.scores.contains_key(&player) {
                if let Some(&score) = room.scores.get(&player) {
                    live.scores.insert(player, score);
                }
            }
            live.ensure_player(player);
        }
        return Ok(live);
    }
    Ok(LiveGame::from_room_state(
        &room.found_letters,
        &room.scores,
        &players,
        room.last_activity.timestamp_millis(),
    ))
}
