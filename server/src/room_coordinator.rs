use crate::db::Database;
use crate::db::models::{GameStats, Room};
use crate::error::GameError;
use crate::game_cache::{LiveGameStore, load_or_init};
use crate::notifier::Notifier;
use crate::rating;
use crate::reveal_scheduler::RevealQueue;
use chrono::Utc;
use common::{FORFEIT_SCORE_PENALTY, GuessResult, LiveGame, RoomEvent, RoomSnapshot, RoomStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// What a guess did to the room, handed back to the transport layer.
#[derive(Debug, Clone)]
pub struct GuessOutcome {
    pub result: GuessResult,
    pub finished: bool,
    pub room: RoomSnapshot,
}

/// Orchestrates guess application, completion detection, persistence and
/// cache synchronization for one deployment. Runs concurrently with the
/// auto-reveal worker; the only cross-subsystem defense is that every
/// writer re-reads the cache before mutating and the worker carries an
/// activity-timestamp witness.
pub struct RoomCoordinator {
    db: Arc<dyn Database>,
    cache: Arc<dyn LiveGameStore>,
    notifier: Arc<dyn Notifier>,
    reveal_jobs: Arc<dyn RevealQueue>,
}

impl RoomCoordinator {
    pub fn new(
        db: Arc<dyn Database>,
        cache: Arc<dyn LiveGameStore>,
        notifier: Arc<dyn Notifier>,
        reveal_jobs: Arc<dyn RevealQueue>,
    ) -> Arc<Self> {
        Arc::new(RoomCoordinator { db, cache, notifier, reveal_jobs })
    }

    /// Apply one player guess to a playing room.
    ///
    /// Reconciles against the cached record (rebuilding it from the
    /// durable room when needed), persists the mutation, rewrites the
    /// cache and publishes the refreshed room view. Solving the last cell
    /// finishes the game inline.
    pub async fn apply_guess(
        &self,
        room_id: i32,
        player_id: i32,
        row: u16,
        col: u16,
        letter: char,
    ) -> Result<GuessOutcome, GameError> {
        let room = self
            .db
            .get_room(room_id)
            .await?
            .ok_or(GameError::RoomNotFound(room_id))?;
        if room.status != RoomStatus::Playing {
            return Err(GameError::RoomNotPlaying(room_id));
        }
        let puzzle = self
            .db
            .get_puzzle(room.puzzle_id)
            .await?
            .ok_or(GameError::PuzzleNotFound(room.puzzle_id))?;
        if puzzle.solution_at(row, col).is_none() {
            // Malformed coordinates never touch any state.
            return Err(GameError::InvalidCell { row, col });
        }

        let mut live = load_or_init(self.cache.as_ref(), &room).await?;
        let now_ms = Utc::now().timestamp_millis();
        let result = live.apply_guess(&puzzle, player_id, row, col, letter, now_ms);

        if result == GuessResult::AlreadySolved {
            // Converges concurrent writers on the same cell: whoever got
            // there first owns the counter and the score delta.
            return Ok(GuessOutcome {
                result,
                finished: false,
                room: snapshot_from_live(&room, &live),
            });
        }

        if live.is_solved() {
            let finished = self.on_game_end(&room, &live, None).await?;
            let snapshot = snapshot_from_room(&finished, live.last_activity_ms);
            self.notifier
                .publish_room(room_id, &RoomEvent::Room { room: snapshot.clone() })
                .await?;
            return Ok(GuessOutcome { result, finished: true, room: snapshot });
        }

        self.db
            .update_room_progress(room_id, &live.grid_string(), &live.scores, Utc::now())
            .await?;
        self.cache.put(room_id, &live).await?;

        let snapshot = snapshot_from_live(&room, &live);
        self.notifier
            .publish_room(room_id, &RoomEvent::Room { room: snapshot.clone() })
            .await?;
        Ok(GuessOutcome { result, finished: false, room: snapshot })
    }

    /// A player abandons a playing room: everyone else wins, the leaver
    /// takes the score penalty. For a solo time-trial run this simply
    /// finalizes the run.
    pub async fn forfeit_room(&self, room_id: i32, player_id: i32) -> Result<Room, GameError> {
        let room = self
            .db
            .get_room(room_id)
            .await?
            .ok_or(GameError::RoomNotFound(room_id))?;
        if room.status != RoomStatus::Playing {
            return Err(GameError::RoomNotPlaying(room_id));
        }
        if !room.player_ids().contains(&player_id) {
            return Err(GameError::PlayerNotInRoom { room_id, player_id });
        }

        let live = load_or_init(self.cache.as_ref(), &room).await?;
        let finished = self.on_game_end(&room, &live, Some(player_id)).await?;
        if finished.status == RoomStatus::Finished {
            let snapshot = snapshot_from_room(&finished, live.last_activity_ms);
            self.notifier.publish_room(room_id, &RoomEvent::Room { room: snapshot }).await?;
        }
        Ok(finished)
    }

    /// The game-end procedure. Finalizes stats and ratings for a played
    /// room, or deletes a multiplayer room nobody ever scored in. The
    /// durable writes run inside the finalize transaction, which holds the
    /// row lock on the room.
    pub async fn on_game_end(
        &self,
        room: &Room,
        live: &LiveGame,
        forfeiting_player: Option<i32>,
    ) -> Result<Room, GameError> {
        let players = room.player_ids();

        // A multiplayer room without a single correct guess is dropped
        // rather than finalized.
        if !room.mode.is_solo() && live.total_correct_guesses() == 0 {
            self.db.delete_room(room.id).await?;
            self.reveal_jobs.cancel_room(room.id).await?;
            self.cache.remove(room.id).await?;
            self.notifier
                .publish_room(room.id, &RoomEvent::GameCancelled { room_id: room.id })
                .await?;
            info!("Cancelled unplayed room {}", room.id);
            let mut cancelled = room.clone();
            cancelled.status = RoomStatus::Cancelled;
            return Ok(cancelled);
        }

        // Forfeit penalties don't apply to a solo run ending early.
        let forfeit = forfeiting_player.filter(|_| !room.mode.is_solo());
        let mut final_scores = live.scores.clone();
        if let Some(forfeiter) = forfeit {
            *final_scores.entry(forfeiter).or_insert(0) += FORFEIT_SCORE_PENALTY;
        }

        let winners = determine_winners(&players, &final_scores, forfeit);
        let profiles = self.db.get_rating_profiles(&players).await?;

        let stats: Vec<GameStats> = players
            .iter()
            .map(|&player| {
                let counters = live.guess_counts.get(&player).copied().unwrap_or_default();
                let details = live.guess_details.get(&player).cloned().unwrap_or_default();
                let profile = profiles.get(&player).copied().unwrap_or_default();
                let won = winners.contains(&player);
                GameStats {
                    room_id: room.id,
                    user_id: player,
                    correct_guesses: counters.correct,
                    incorrect_guesses: counters.incorrect,
                    guess_details: details,
                    is_winner: won,
                    win_streak: if won { profile.win_streak + 1 } else { 0 },
                    rating_before: profile.rating,
                    rating_change: 0,
                }
            })
            .collect();

        let finished = self
            .db
            .finalize_room(room.id, &live.grid_string(), &final_scores, &stats)
            .await?;
        info!("Room {} finished with winners {:?}", room.id, winners);

        let new_ratings =
            rating::update_ratings(self.db.as_ref(), &finished, &final_scores, &profiles).await?;
        for (&user_id, &new_rating) in &new_ratings {
            let old_rating = profiles.get(&user_id).copied().unwrap_or_default().rating;
            self.notifier
                .publish_user(
                    user_id,
                    &RoomEvent::RatingChange { player_id: user_id, old_rating, new_rating },
                )
                .await?;
        }

        if let Some(forfeiter) = forfeit {
            self.notifier
                .publish_room(room.id, &RoomEvent::GameForfeited { player_id: forfeiter })
                .await?;
        }

        Ok(finished)
    }
}

/// Winners are whoever holds the top score; a forfeit hands the win to
/// everyone who stayed.
fn determine_winners(
    players: &[i32],
    final_scores: &HashMap<i32, i32>,
    forfeiting_player: Option<i32>,
) -> HashSet<i32> {
    if let Some(forfeiter) = forfeiting_player {
        return players.iter().copied().filter(|&p| p != forfeiter).collect();
    }
    let max_score = players.iter().map(|p| final_scores.get(p).copied().unwrap_or(0)).max();
    match max_score {
        Some(max) => players
            .iter()
            .copied()
            .filter(|p| final_scores.get(p).copied().unwrap_or(0) == max)
            .collect(),
        None => HashSet::new(),
    }
}

/// Room view built from the fresher cached state.
pub fn snapshot_from_live(room: &Room, live: &LiveGame) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room.id,
        status: room.status,
        mode: room.mode,
        players: room.player_ids(),
        scores: live.scores.clone(),
        found_letters: live.grid_string(),
        last_activity_ms: live.last_activity_ms,
    }
}

/// Room view built from the durable row, used once a room is finalized and
/// the merged grid/scores are authoritative.
pub fn snapshot_from_room(room: &Room, last_activity_ms: i64) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room.id,
        status: room.status,
        mode: room.mode,
        players: room.player_ids(),
        scores: room.scores.clone(),
        found_letters: room.found_letters.clone(),
        last_activity_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        MemoryDatabase, MemoryLiveGameStore, RecordingNotifier, RecordingQueue, seed_playing_room,
    };
    use common::{CORRECT_GUESS_POINTS, GameMode, INCORRECT_GUESS_POINTS};

    struct Fixture {
        db: Arc<MemoryDatabase>,
        cache: Arc<MemoryLiveGameStore>,
        notifier: Arc<RecordingNotifier>,
        queue: Arc<RecordingQueue>,
        coordinator: Arc<RoomCoordinator>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(MemoryDatabase::default());
        let cache = Arc::new(MemoryLiveGameStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let queue = Arc::new(RecordingQueue::default());
        let coordinator =
            RoomCoordinator::new(db.clone(), cache.clone(), notifier.clone(), queue.clone());
        Fixture { db, cache, notifier, queue, coordinator }
    }

    #[tokio::test]
    async fn test_correct_guess_updates_cache_room_and_notifies() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();

        let outcome = f.coordinator.apply_guess(room_id, 7, 0, 0, 'c').await.unwrap();
        assert_eq!(outcome.result, GuessResult::Correct { letter: 'C' });
        assert!(!outcome.finished);
        // The solution's casing is what gets persisted.
        assert_eq!(outcome.room.found_letters, "C**");

        let live = f.cache.record(room_id).unwrap();
        assert_eq!(live.guess_counts[&7].correct, 1);
        assert_eq!(live.scores[&7], CORRECT_GUESS_POINTS);
        assert_eq!(live.guess_details[&7].len(), 1);

        let room = f.db.room(room_id).unwrap();
        assert_eq!(room.found_letters, "C**");
        assert_eq!(room.scores[&7], CORRECT_GUESS_POINTS);

        assert_eq!(f.notifier.count_room_events(|e| matches!(e, RoomEvent::Room { .. })), 1);
    }

    #[tokio::test]
    async fn test_incorrect_guess_costs_points_and_keeps_grid() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();

        let outcome = f.coordinator.apply_guess(room_id, 7, 0, 1, 'z').await.unwrap();
        assert_eq!(outcome.result, GuessResult::Incorrect);
        assert_eq!(outcome.room.found_letters, "***");

        let live = f.cache.record(room_id).unwrap();
        assert_eq!(live.guess_counts[&7].incorrect, 1);
        assert_eq!(live.scores[&7], INCORRECT_GUESS_POINTS);
    }

    #[tokio::test]
    async fn test_repeated_guesses_at_a_cell_count_once() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();

        f.coordinator.apply_guess(room_id, 7, 0, 0, 'C').await.unwrap();
        // Same cell again, other player, other letter: dropped silently.
        let replay = f.coordinator.apply_guess(room_id, 8, 0, 0, 'X').await.unwrap();
        assert_eq!(replay.result, GuessResult::AlreadySolved);

        let live = f.cache.record(room_id).unwrap();
        assert_eq!(live.guess_counts[&7].correct, 1);
        assert_eq!(live.guess_counts[&8], Default::default());
        assert_eq!(live.scores[&7], CORRECT_GUESS_POINTS);
        assert_eq!(live.scores[&8], 0);
        // The no-op produced no extra room notification.
        assert_eq!(f.notifier.count_room_events(|e| matches!(e, RoomEvent::Room { .. })), 1);
    }

    #[tokio::test]
    async fn test_missing_room_is_reported() {
        let f = fixture();
        let err = f.coordinator.apply_guess(999, 7, 0, 0, 'a').await.unwrap_err();
        assert!(matches!(err, GameError::RoomNotFound(999)));
    }

    #[tokio::test]
    async fn test_pending_room_rejects_guesses() {
        let f = fixture();
        let puzzle = common::Puzzle::new(0, 3, 1, "CAT").unwrap();
        let blank: String = puzzle.blank_grid().iter().collect();
        let puzzle_id = f.db.insert_puzzle(puzzle);
        let room = f.db.create_room(GameMode::OneVsOne, puzzle_id, &blank).await.unwrap();

        let err = f.coordinator.apply_guess(room.id, 7, 0, 0, 'c').await.unwrap_err();
        assert!(matches!(err, GameError::RoomNotPlaying(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_guess_leaves_state_untouched() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();

        let err = f.coordinator.apply_guess(room_id, 7, 5, 9, 'c').await.unwrap_err();
        assert!(matches!(err, GameError::InvalidCell { row: 5, col: 9 }));
        assert!(f.cache.record(room_id).is_none());
        assert!(f.notifier.room_events().is_empty());
        assert_eq!(f.db.room(room_id).unwrap().found_letters, "***");
    }

    #[tokio::test]
    async fn test_single_cell_puzzle_finishes_on_first_correct_guess() {
        let f = fixture();
        let room_id = seed_playing_room(&f.db, GameMode::OneVsOne, 1, 1, "A", &[(7, 0), (8, 1)])
            .await
            .unwrap();

        let outcome = f.coordinator.apply_guess(room_id, 7, 0, 0, 'a').await.unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.room.status, RoomStatus::Finished);

        let room = f.db.room(room_id).unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(room.finished_at.is_some());
        assert_eq!(room.found_letters, "A");

        // Winner and loser stats were finalized under the lock.
        let winner = f.db.stats_row(room_id, 7).unwrap();
        assert!(winner.is_winner);
        assert_eq!(winner.correct_guesses, 1);
        assert_eq!(winner.win_streak, 1);
        let loser = f.db.stats_row(room_id, 8).unwrap();
        assert!(!loser.is_winner);
        assert_eq!(loser.win_streak, 0);

        // Equal 50-game profiles at 1000: the winner takes K/2 = 16.
        assert_eq!(f.db.user(7).unwrap().rating, 1016);
        assert_eq!(f.db.user(8).unwrap().rating, 984);
        assert_eq!(winner.rating_before, 1000);

        let rating_events = f.notifier.user_events();
        assert_eq!(rating_events.len(), 2);
        assert!(
            rating_events
                .iter()
                .all(|(_, e)| matches!(e, RoomEvent::RatingChange { .. }))
        );
    }

    #[tokio::test]
    async fn test_forfeit_hands_the_win_to_the_remaining_player() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();
        f.coordinator.apply_guess(room_id, 8, 0, 0, 'c').await.unwrap();

        let finished = f.coordinator.forfeit_room(room_id, 8).await.unwrap();
        assert_eq!(finished.status, RoomStatus::Finished);

        // The leaver pays the penalty on top of their earned points.
        assert_eq!(finished.scores[&8], CORRECT_GUESS_POINTS + common::FORFEIT_SCORE_PENALTY);
        let stayer = f.db.stats_row(room_id, 7).unwrap();
        assert!(stayer.is_winner);
        let leaver = f.db.stats_row(room_id, 8).unwrap();
        assert!(!leaver.is_winner);

        assert_eq!(
            f.notifier.count_room_events(|e| matches!(
                e,
                RoomEvent::GameForfeited { player_id: 8 }
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_unplayed_room_is_deleted_not_finalized() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();
        // One wrong guess so the cache exists but nobody scored a letter.
        f.coordinator.apply_guess(room_id, 7, 0, 0, 'z').await.unwrap();

        let result = f.coordinator.forfeit_room(room_id, 7).await.unwrap();
        assert_eq!(result.status, RoomStatus::Cancelled);
        assert!(f.db.room(room_id).is_none());
        assert!(f.cache.record(room_id).is_none());
        assert_eq!(f.queue.cancelled(), vec![room_id]);
        assert_eq!(
            f.notifier.count_room_events(|e| matches!(e, RoomEvent::GameCancelled { .. })),
            1
        );
        // Ratings never moved.
        assert_eq!(f.db.user(7).unwrap().rating, 1000);
        assert_eq!(f.db.user(8).unwrap().rating, 1000);
    }

    #[tokio::test]
    async fn test_time_trial_forfeit_finalizes_without_penalty() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::TimeTrial, 3, 1, "CAT", &[(7, 0)]).await.unwrap();
        f.coordinator.apply_guess(room_id, 7, 0, 0, 'c').await.unwrap();

        let finished = f.coordinator.forfeit_room(room_id, 7).await.unwrap();
        assert_eq!(finished.status, RoomStatus::Finished);
        assert_eq!(finished.scores[&7], CORRECT_GUESS_POINTS);
        assert!(
            f.notifier.room_events().iter().all(|(_, e)| !matches!(
                e,
                RoomEvent::GameForfeited { .. }
            ))
        );
        // Solo runs never move ratings.
        assert_eq!(f.db.user(7).unwrap().rating, 1000);
        assert!(f.notifier.user_events().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_cache_record_is_rebuilt_for_new_player() {
        let f = fixture();
        let room_id =
            seed_playing_room(&f.db, GameMode::OneVsOne, 3, 1, "CAT", &[(7, 0), (8, 1)])
                .await
                .unwrap();
        // A record written before player 8 joined.
        let mut stale = LiveGame::from_room_state("***", &HashMap::new(), &[7], 1_000);
        stale.guess_counts.get_mut(&7).unwrap().correct = 2;
        f.cache.seed(room_id, stale);

        let outcome = f.coordinator.apply_guess(room_id, 8, 0, 0, 'c').await.unwrap();
        assert_eq!(outcome.result, GuessResult::Correct { letter: 'C' });

        let live = f.cache.record(room_id).unwrap();
        assert!(live.is_complete_for(&[7, 8]));
        // Existing counters survived the re-initialization.
        assert_eq!(live.guess_counts[&7].correct, 2);
        assert_eq!(live.guess_counts[&8].correct, 1);
    }
}
