mod constants;
mod events;
mod live_game;
mod puzzle;
mod room;

pub use constants::*;
pub use events::*;
pub use live_game::*;
pub use puzzle::*;
pub use room::*;
