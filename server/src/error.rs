use thiserror::Error;

/// Caller-visible failures of the game core. Infrastructure errors keep
/// their context under `Storage`; validation failures leave state exactly
/// as it was.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Room {0} not found")]
    RoomNotFound(i32),

    #[error("Puzzle {0} not found")]
    PuzzleNotFound(i32),

    #[error("Room {0} is not accepting guesses")]
    RoomNotPlaying(i32),

    #[error("Player {player_id} is not in room {room_id}")]
    PlayerNotInRoom { room_id: i32, player_id: i32 },

    #[error("Cell ({row}, {col}) is not a playable cell")]
    InvalidCell { row: u16, col: u16 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
