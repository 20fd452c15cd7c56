/// Points awarded for a correct guess
pub const CORRECT_GUESS_POINTS: i32 = 10;

/// Points added for an incorrect guess (negative)
pub const INCORRECT_GUESS_POINTS: i32 = -2;

/// Score penalty applied to a forfeiting player in multiplayer modes
pub const FORFEIT_SCORE_PENALTY: i32 = -50;

/// Starting rating for new users
pub const DEFAULT_RATING: i32 = 1000;

/// Base K-factor for rating updates
pub const BASE_K_FACTOR: f64 = 32.0;

/// Players with fewer than this many finished games get amplified rating swings
pub const RATING_DAMPENING_GAMES: f64 = 30.0;

/// Win-streak bonus added to the K-factor per consecutive win
pub const WIN_STREAK_BONUS_STEP: f64 = 0.1;

/// Cap on the total win-streak bonus
pub const MAX_WIN_STREAK_BONUS: f64 = 0.5;

/// Delay before the first automatic reveal in a fresh room, milliseconds
pub const INITIAL_REVEAL_DELAY_MS: u64 = 60_000;

/// Floor for the reveal delay as the puzzle nears completion, milliseconds
pub const MIN_REVEAL_DELAY_MS: u64 = 10_000;

/// Fractional shrink applied to the reveal delay per completion step
pub const REVEAL_ACCELERATION_RATE: f64 = 0.35;

/// Completion-rate bucket width for the reveal delay curve
pub const REVEAL_COMPLETION_STEP: f64 = 0.2;

/// TTL for the cached live-game record, seconds
pub const LIVE_GAME_TTL_SECONDS: u64 = 86_400;
