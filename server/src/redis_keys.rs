pub struct RedisKeys;

impl RedisKeys {
    // === Live Game Cache ===

    /// Cached live-game record for a room
    pub fn live_game(room_id: i32) -> String {
        format!("room:live:{}", room_id)
    }

    // === Fan-out Channels ===

    /// Events channel for everyone connected to a room
    pub fn room_channel(room_id: i32) -> String {
        format!("crosswords:room:{}", room_id)
    }

    /// Events channel for a single user's connections
    pub fn user_channel(user_id: i32) -> String {
        format!("crosswords:user:{}", user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(RedisKeys::live_game(42), "room:live:42");
        assert_eq!(RedisKeys::room_channel(42), "crosswords:room:42");
        assert_eq!(RedisKeys::user_channel(7), "crosswords:user:7");
    }
}
