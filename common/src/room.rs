use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GameMode {
    #[serde(rename = "1v1")]
    OneVsOne,
    #[serde(rename = "2v2")]
    TwoVsTwo,
    #[serde(rename = "free_for_all")]
    FreeForAll,
    #[serde(rename = "time_trial")]
    TimeTrial,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::OneVsOne => "1v1",
            GameMode::TwoVsTwo => "2v2",
            GameMode::FreeForAll => "free_for_all",
            GameMode::TimeTrial => "time_trial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1v1" => Some(GameMode::OneVsOne),
            "2v2" => Some(GameMode::TwoVsTwo),
            "free_for_all" => Some(GameMode::FreeForAll),
            "time_trial" => Some(GameMode::TimeTrial),
            _ => None,
        }
    }

    /// Single-player mode: no opponents, no rating movement.
    pub fn is_solo(&self) -> bool {
        matches!(self, GameMode::TimeTrial)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Pending,
    Playing,
    Finished,
    Cancelled,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Pending => "pending",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
            RoomStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RoomStatus::Pending),
            "playing" => Some(RoomStatus::Playing),
            "finished" => Some(RoomStatus::Finished),
            "cancelled" => Some(RoomStatus::Cancelled),
            _ => None,
        }
    }
}

/// Client-facing state of a room, published with every `room` event. The
/// solution never appears here, only the revealed grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: i32,
    pub status: RoomStatus,
    pub mode: GameMode,
    pub players: Vec<i32>,
    pub scores: HashMap<i32, i32>,
    pub found_letters: String,
    pub last_activity_ms: i64,
}
