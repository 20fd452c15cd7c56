use chrono::{DateTime, Utc};
use common::{CorrectGuess, DEFAULT_RATING, GameMode, RoomStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: i32,
    pub status: RoomStatus,
    pub mode: GameMode,
    pub puzzle_id: i32,
    pub found_letters: String,
    pub scores: HashMap<i32, i32>,
    pub players: Vec<RoomPlayer>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl Room {
    pub fn player_ids(&self) -> Vec<i32> {
        self.players.iter().map(|p| p.user_id).collect()
    }

    pub fn team_of(&self, user_id: i32) -> Option<i32> {
        self.players.iter().find(|p| p.user_id == user_id).map(|p| p.team_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoomPlayer {
    pub user_id: i32,
    pub team_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub rating: i32,
    pub games_played: i32,
    pub win_streak: i32,
    pub created_at: DateTime<Utc>,
}

/// One durable row per (room, player). Created zeroed when the player
/// joins, filled in by the game-end procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStats {
    pub room_id: i32,
    pub user_id: i32,
    pub correct_guesses: u32,
    pub incorrect_guesses: u32,
    pub guess_details: Vec<CorrectGuess>,
    pub is_winner: bool,
    pub win_streak: i32,
    pub rating_before: i32,
    pub rating_change: i32,
}

/// Rating-engine inputs for one player: current rating, count of finished
/// games, and the streak carried out of their latest finished game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatingProfile {
    pub rating: i32,
    pub games_played: i32,
    pub win_streak: i32,
}

impl Default for RatingProfile {
    fn default() -> Self {
        RatingProfile { rating: DEFAULT_RATING, games_played: 0, win_streak: 0 }
    }
}
