pub mod models;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GameMode, Puzzle};
use std::collections::HashMap;

use models::*;

#[async_trait]
pub trait Database: Send + Sync {
    // Room operations
    async fn create_room(&self, mode: GameMode, puzzle_id: i32, found_letters: &str) -> Result<Room>;
    async fn add_player_to_room(&self, room_id: i32, user_id: i32, team_id: i32) -> Result<()>;
    async fn get_room(&self, room_id: i32) -> Result<Option<Room>>;
    async fn start_room(&self, room_id: i32) -> Result<()>;
    async fn update_room_progress(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        last_activity: DateTime<Utc>,
    ) -> Result<()>;
    /// The completion critical section: lock the room row, merge the cached
    /// mutations (durable letters win on conflict), mark the room finished
    /// and finalize every stats row — all in one transaction. Returns the
    /// finished room.
    async fn finalize_room(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        stats: &[GameStats],
    ) -> Result<Room>;
    async fn delete_room(&self, room_id: i32) -> Result<()>;
    async fn get_playing_room_ids(&self) -> Result<Vec<i32>>;

    // Puzzle operations
    async fn get_puzzle(&self, puzzle_id: i32) -> Result<Option<Puzzle>>;

    // User / rating operations
    async fn create_user(&self, username: &str, rating: i32) -> Result<User>;
    async fn get_rating_profiles(&self, user_ids: &[i32]) -> Result<HashMap<i32, RatingProfile>>;
    async fn update_user_rating(&self, user_id: i32, rating: i32) -> Result<()>;
    async fn record_rating_change(&self, room_id: i32, user_id: i32, rating_change: i32) -> Result<()>;
}
