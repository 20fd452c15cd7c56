use crate::room::RoomSnapshot;
use serde::{Deserialize, Serialize};

/// A letter exposed by the inactivity worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RevealedLetter {
    pub row: u16,
    pub col: u16,
    pub letter: char,
}

/// Events handed to the fan-out collaborator for delivery to connected
/// clients. The core only publishes these; delivery lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    Room {
        room: RoomSnapshot,
    },
    // Field names kept camelCase for older clients.
    #[serde(rename_all = "camelCase")]
    GameInactive {
        completion_rate: f64,
        next_timeout: u64,
        revealed_letter: RevealedLetter,
        is_game_finished: bool,
    },
    GameForfeited {
        player_id: i32,
    },
    GameCancelled {
        room_id: i32,
    },
    RatingChange {
        player_id: i32,
        old_rating: i32,
        new_rating: i32,
    },
}
