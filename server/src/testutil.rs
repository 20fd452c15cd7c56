//! In-memory fakes behind the storage, cache, fan-out and queue seams.

use crate::db::Database;
use crate::db::models::{GameStats, RatingProfile, Room, RoomPlayer, User};
use crate::game_cache::LiveGameStore;
use crate::notifier::Notifier;
use crate::reveal_scheduler::{RevealJob, RevealQueue};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use common::{DEFAULT_RATING, GameMode, LiveGame, Puzzle, RoomEvent, RoomStatus, merge_grids};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory durable store with the same merge-and-finalize semantics as
/// the Postgres implementation.
#[derive(Default)]
pub struct MemoryDatabase {
    rooms: Mutex<HashMap<i32, Room>>,
    puzzles: Mutex<HashMap<i32, Puzzle>>,
    users: Mutex<HashMap<i32, User>>,
    stats: Mutex<HashMap<(i32, i32), GameStats>>,
    next_id: Mutex<i32>,
}

impl MemoryDatabase {
    fn allocate_id(&self) -> i32 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    pub fn insert_puzzle(&self, mut puzzle: Puzzle) -> i32 {
        let id = self.allocate_id();
        puzzle.id = id;
        self.puzzles.lock().unwrap().insert(id, puzzle);
        id
    }

    pub fn insert_user(&self, id: i32, rating: i32, games_played: i32, win_streak: i32) {
        self.users.lock().unwrap().insert(
            id,
            User {
                id,
                username: format!("user{}", id),
                rating,
                games_played,
                win_streak,
                created_at: Utc::now(),
            },
        );
    }

    pub fn room(&self, room_id: i32) -> Option<Room> {
        self.rooms.lock().unwrap().get(&room_id).cloned()
    }

    pub fn user(&self, user_id: i32) -> Option<User> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    pub fn stats_row(&self, room_id: i32, user_id: i32) -> Option<GameStats> {
        self.stats.lock().unwrap().get(&(room_id, user_id)).cloned()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn create_room(&self, mode: GameMode, puzzle_id: i32, found_letters: &str) -> Result<Room> {
        let id = self.allocate_id();
        let room = Room {
            id,
            status: RoomStatus::Pending,
            mode,
            puzzle_id,
            found_letters: found_letters.to_string(),
            scores: HashMap::new(),
            players: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            last_activity: Utc::now(),
        };
        self.rooms.lock().unwrap().insert(id, room.clone());
        Ok(room)
    }

    async fn add_player_to_room(&self, room_id: i32, user_id: i32, team_id: i32) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&room_id).ok_or_else(|| anyhow!("Room {} not found", room_id))?;
        if !room.players.iter().any(|p| p.user_id == user_id) {
            room.players.push(RoomPlayer { user_id, team_id });
        }
        room.scores.entry(user_id).or_insert(0);
        self.stats.lock().unwrap().entry((room_id, user_id)).or_insert(GameStats {
            room_id,
            user_id,
            correct_guesses: 0,
            incorrect_guesses: 0,
            guess_details: Vec::new(),
            is_winner: false,
            win_streak: 0,
            rating_before: DEFAULT_RATING,
            rating_change: 0,
        });
        Ok(())
    }

    async fn get_room(&self, room_id: i32) -> Result<Option<Room>> {
        Ok(self.rooms.lock().unwrap().get(&room_id).cloned())
    }

    async fn start_room(&self, room_id: i32) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&room_id).ok_or_else(|| anyhow!("Room {} not found", room_id))?;
        if room.status == RoomStatus::Pending {
            room.status = RoomStatus::Playing;
            room.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn update_room_progress(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        last_activity: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&room_id).ok_or_else(|| anyhow!("Room {} not found", room_id))?;
        room.found_letters = found_letters.to_string();
        room.scores = scores.clone();
        room.last_activity = last_activity;
        Ok(())
    }

    async fn finalize_room(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        stats: &[GameStats],
    ) -> Result<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms
            .get_mut(&room_id)
            .ok_or_else(|| anyhow!("Room {} disappeared before finalization", room_id))?;

        room.found_letters = merge_grids(&room.found_letters, found_letters);
        for (&user_id, &score) in scores {
            room.scores.insert(user_id, score);
        }
        let now = Utc::now();
        room.status = RoomStatus::Finished;
        room.finished_at = Some(now);
        room.last_activity = now;

        let mut stats_map = self.stats.lock().unwrap();
        let mut users = self.users.lock().unwrap();
        for entry in stats {
            stats_map.insert((entry.room_id, entry.user_id), entry.clone());
            if let Some(user) = users.get_mut(&entry.user_id) {
                user.games_played += 1;
                user.win_streak = entry.win_streak;
            }
        }
        Ok(room.clone())
    }

    async fn delete_room(&self, room_id: i32) -> Result<()> {
        self.rooms.lock().unwrap().remove(&room_id);
        self.stats.lock().unwrap().retain(|&(r, _), _| r != room_id);
        Ok(())
    }

    async fn get_playing_room_ids(&self) -> Result<Vec<i32>> {
        let mut ids: Vec<i32> = self
            .rooms
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == RoomStatus::Playing)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_puzzle(&self, puzzle_id: i32) -> Result<Option<Puzzle>> {
        Ok(self.puzzles.lock().unwrap().get(&puzzle_id).cloned())
    }

    async fn create_user(&self, username: &str, rating: i32) -> Result<User> {
        let id = self.allocate_id();
        let user = User {
            id,
            username: username.to_string(),
            rating,
            games_played: 0,
            win_streak: 0,
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().insert(id, user.clone());
        Ok(user)
    }

    async fn get_rating_profiles(&self, user_ids: &[i32]) -> Result<HashMap<i32, RatingProfile>> {
        let users = self.users.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| {
                users.get(id).map(|u| {
                    (
                        *id,
                        RatingProfile {
                            rating: u.rating,
                            games_played: u.games_played,
                            win_streak: u.win_streak,
                        },
                    )
                })
            })
            .collect())
    }

    async fn update_user_rating(&self, user_id: i32, rating: i32) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.rating = rating;
        }
        Ok(())
    }

    async fn record_rating_change(&self, room_id: i32, user_id: i32, rating_change: i32) -> Result<()> {
        if let Some(entry) = self.stats.lock().unwrap().get_mut(&(room_id, user_id)) {
            entry.rating_change = rating_change;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLiveGameStore {
    records: Mutex<HashMap<i32, LiveGame>>,
}

impl MemoryLiveGameStore {
    pub fn record(&self, room_id: i32) -> Option<LiveGame> {
        self.records.lock().unwrap().get(&room_id).cloned()
    }

    pub fn seed(&self, room_id: i32, live: LiveGame) {
        self.records.lock().unwrap().insert(room_id, live);
    }
}

#[async_trait]
impl LiveGameStore for MemoryLiveGameStore {
    async fn get(&self, room_id: i32) -> Result<Option<LiveGame>> {
        Ok(self.records.lock().unwrap().get(&room_id).cloned())
    }

    async fn put(&self, room_id: i32, live: &LiveGame) -> Result<()> {
        self.records.lock().unwrap().insert(room_id, live.clone());
        Ok(())
    }

    async fn remove(&self, room_id: i32) -> Result<()> {
        self.records.lock().unwrap().remove(&room_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    room_events: Mutex<Vec<(i32, RoomEvent)>>,
    user_events: Mutex<Vec<(i32, RoomEvent)>>,
}

impl RecordingNotifier {
    pub fn room_events(&self) -> Vec<(i32, RoomEvent)> {
        self.room_events.lock().unwrap().clone()
    }

    pub fn user_events(&self) -> Vec<(i32, RoomEvent)> {
        self.user_events.lock().unwrap().clone()
    }

    pub fn count_room_events(&self, matcher: impl Fn(&RoomEvent) -> bool) -> usize {
        self.room_events.lock().unwrap().iter().filter(|(_, e)| matcher(e)).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish_room(&self, room_id: i32, event: &RoomEvent) -> Result<()> {
        self.room_events.lock().unwrap().push((room_id, event.clone()));
        Ok(())
    }

    async fn publish_user(&self, user_id: i32, event: &RoomEvent) -> Result<()> {
        self.user_events.lock().unwrap().push((user_id, event.clone()));
        Ok(())
    }
}

/// Records enqueues instead of running them; can be told to fail the next
/// N enqueue calls to exercise the retry path.
#[derive(Default)]
pub struct RecordingQueue {
    enqueued: Mutex<Vec<(String, RevealJob, Duration)>>,
    cancelled: Mutex<Vec<i32>>,
    fail_next: Mutex<u32>,
}

impl RecordingQueue {
    pub fn enqueued(&self) -> Vec<(String, RevealJob, Duration)> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<i32> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock().unwrap() = count;
    }
}

#[async_trait]
impl RevealQueue for RecordingQueue {
    async fn enqueue(&self, job_id: &str, job: RevealJob, delay: Duration) -> Result<()> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(anyhow!("Injected enqueue failure"));
            }
        }
        self.enqueued.lock().unwrap().push((job_id.to_string(), job, delay));
        Ok(())
    }

    async fn cancel_room(&self, room_id: i32) -> Result<()> {
        self.cancelled.lock().unwrap().push(room_id);
        Ok(())
    }
}

/// Mirror the external create/join/start flow: a puzzle, a room in
/// `playing` state, and one user row per `(user_id, team_id)` pair.
pub async fn seed_playing_room(
    db: &MemoryDatabase,
    mode: GameMode,
    width: u16,
    height: u16,
    solution: &str,
    players: &[(i32, i32)],
) -> Result<i32> {
    let puzzle = Puzzle::new(0, width, height, solution)?;
    let blank: String = puzzle.blank_grid().iter().collect();
    let puzzle_id = db.insert_puzzle(puzzle);
    let room = db.create_room(mode, puzzle_id, &blank).await?;
    for &(user_id, team_id) in players {
        if db.user(user_id).is_none() {
            db.insert_user(user_id, DEFAULT_RATING, 50, 0);
        }
        db.add_player_to_room(room.id, user_id, team_id).await?;
    }
    db.start_room(room.id).await?;
    Ok(room.id)
}
