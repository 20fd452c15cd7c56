use crate::constants::{CORRECT_GUESS_POINTS, INCORRECT_GUESS_POINTS};
use crate::puzzle::{BLOCKED_CELL, Puzzle, UNSOLVED_CELL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuessCounters {
    pub correct: u32,
    pub incorrect: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectGuess {
    pub row: u16,
    pub col: u16,
    pub letter: char,
    pub timestamp_ms: i64,
}

/// The ephemeral per-room record held in the cache store. This is the fast
/// path for guess reconciliation; the durable room row is authoritative
/// when the two are merged at transaction commit time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveGame {
    pub last_activity_ms: i64,
    pub found_letters: Vec<char>,
    pub scores: HashMap<i32, i32>,
    pub guess_counts: HashMap<i32, GuessCounters>,
    pub guess_details: HashMap<i32, Vec<CorrectGuess>>,
}

/// Outcome of applying a single guess to the cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessResult {
    /// The cell already carried a letter; nothing was changed.
    AlreadySolved,
    Correct { letter: char },
    Incorrect,
}

impl LiveGame {
    /// Rebuild the record from the durable room state. Used on cache miss
    /// and whenever the stored record is structurally incomplete.
    pub fn from_room_state(
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        players: &[i32],
        last_activity_ms: i64,
    ) -> Self {
        let mut live = LiveGame {
            last_activity_ms,
            found_letters: found_letters.chars().collect(),
            scores: scores.clone(),
            guess_counts: HashMap::new(),
            guess_details: HashMap::new(),
        };
        for &player in players {
            live.ensure_player(player);
        }
        live
    }

    /// Zero-initialize the per-player entries for a participant that is
    /// missing from any of the maps.
    pub fn ensure_player(&mut self, user_id: i32) {
        self.scores.entry(user_id).or_insert(0);
        self.guess_counts.entry(user_id).or_default();
        self.guess_details.entry(user_id).or_default();
    }

    /// Whether every participant has a score, a counter entry and a
    /// details list.
    pub fn is_complete_for(&self, players: &[i32]) -> bool {
        players.iter().all(|p| {
            self.scores.contains_key(p)
                && self.guess_counts.contains_key(p)
                && self.guess_details.contains_key(p)
        })
    }

    /// Apply a guess at a cell the caller has already validated as
    /// playable. Bumps `last_activity_ms` for anything but the
    /// already-solved no-op.
    pub fn apply_guess(
        &mut self,
        puzzle: &Puzzle,
        user_id: i32,
        row: u16,
        col: u16,
        guess: char,
        now_ms: i64,
    ) -> GuessResult {
        let idx = match puzzle.index(row, col) {
            Some(idx) => idx,
            None => return GuessResult::AlreadySolved,
        };
        if self.found_letters[idx] != UNSOLVED_CELL {
            // The gate only looks at the destination cell, so a stale
            // resubmission of a wrong guess at a now-solved cell is
            // silently dropped.
            return GuessResult::AlreadySolved;
        }
        self.ensure_player(user_id);
        let solution = match puzzle.solution_at(row, col) {
            Some(letter) => letter,
            None => return GuessResult::AlreadySolved,
        };
        self.last_activity_ms = now_ms;
        if guess.eq_ignore_ascii_case(&solution) {
            // Persist the solution's casing, not the client's.
            self.found_letters[idx] = solution;
            let counters = self.guess_counts.entry(user_id).or_default();
            counters.correct += 1;
            self.guess_details.entry(user_id).or_default().push(CorrectGuess {
                row,
                col,
                letter: solution,
                timestamp_ms: now_ms,
            });
            *self.scores.entry(user_id).or_insert(0) += CORRECT_GUESS_POINTS;
            GuessResult::Correct { letter: solution }
        } else {
            let counters = self.guess_counts.entry(user_id).or_default();
            counters.incorrect += 1;
            *self.scores.entry(user_id).or_insert(0) += INCORRECT_GUESS_POINTS;
            GuessResult::Incorrect
        }
    }

    /// Reveal the true letter at a cell, as the inactivity worker does.
    /// No counters or scores move.
    pub fn reveal_cell(&mut self, puzzle: &Puzzle, idx: usize, now_ms: i64) -> Option<char> {
        if self.found_letters[idx] != UNSOLVED_CELL {
            return None;
        }
        let letter = puzzle.solution[idx];
        if letter == BLOCKED_CELL {
            return None;
        }
        self.found_letters[idx] = letter;
        self.last_activity_ms = now_ms;
        Some(letter)
    }

    pub fn solved_cells(&self) -> usize {
        self.found_letters
            .iter()
            .filter(|&&c| c != UNSOLVED_CELL && c != BLOCKED_CELL)
            .count()
    }

    pub fn playable_cells(&self) -> usize {
        self.found_letters.iter().filter(|&&c| c != BLOCKED_CELL).count()
    }

    pub fn completion_rate(&self) -> f64 {
        let playable = self.playable_cells();
        if playable == 0 {
            return 1.0;
        }
        self.solved_cells() as f64 / playable as f64
    }

    pub fn unsolved_indices(&self) -> Vec<usize> {
        self.found_letters
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == UNSOLVED_CELL)
            .map(|(i, _)| i)
            .collect()
    }

    /// The puzzle is fully solved once no cell is unsolved.
    pub fn is_solved(&self) -> bool {
        !self.found_letters.contains(&UNSOLVED_CELL)
    }

    pub fn grid_string(&self) -> String {
        self.found_letters.iter().collect()
    }

    /// Total correct guesses across every participant. A multiplayer room
    /// where this is still zero at game end is treated as unplayed.
    pub fn total_correct_guesses(&self) -> u32 {
        self.guess_counts.values().map(|c| c.correct).sum()
    }
}

/// Cell-wise merge of the durable grid with the cached one. A letter
/// present on either side survives; where both carry a letter, the durable
/// side is authoritative.
pub fn merge_grids(durable: &str, cached: &str) -> String {
    durable
        .chars()
        .zip(cached.chars())
        .map(|(d, c)| if d == UNSOLVED_CELL { c } else { d })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn puzzle() -> Puzzle {
        Puzzle::new(1, 3, 1, "CAT").unwrap()
    }

    fn live(puzzle: &Puzzle) -> LiveGame {
        let grid: String = puzzle.blank_grid().iter().collect();
        LiveGame::from_room_state(&grid, &HashMap::new(), &[7, 8], 1_000)
    }

    #[test]
    fn test_init_is_structurally_complete() {
        let p = puzzle();
        let live = live(&p);
        assert!(live.is_complete_for(&[7, 8]));
        assert!(!live.is_complete_for(&[7, 8, 9]));
        assert_eq!(live.scores[&7], 0);
    }

    #[test]
    fn test_correct_guess_scores_and_records() {
        let p = puzzle();
        let mut live = live(&p);
        let result = live.apply_guess(&p, 7, 0, 0, 'c', 2_000);
        assert_eq!(result, GuessResult::Correct { letter: 'C' });
        assert_eq!(live.found_letters[0], 'C');
        assert_eq!(live.guess_counts[&7].correct, 1);
        assert_eq!(live.scores[&7], CORRECT_GUESS_POINTS);
        assert_eq!(live.guess_details[&7].len(), 1);
        assert_eq!(live.last_activity_ms, 2_000);
    }

    #[test]
    fn test_incorrect_guess_leaves_grid() {
        let p = puzzle();
        let mut live = live(&p);
        let result = live.apply_guess(&p, 7, 0, 0, 'x', 2_000);
        assert_eq!(result, GuessResult::Incorrect);
        assert_eq!(live.found_letters[0], UNSOLVED_CELL);
        assert_eq!(live.guess_counts[&7].incorrect, 1);
        assert_eq!(live.scores[&7], INCORRECT_GUESS_POINTS);
    }

    #[test]
    fn test_second_guess_at_solved_cell_is_noop() {
        let p = puzzle();
        let mut live = live(&p);
        live.apply_guess(&p, 7, 0, 0, 'C', 2_000);
        let before = live.clone();
        // A different player, a different letter: still dropped.
        let result = live.apply_guess(&p, 8, 0, 0, 'x', 3_000);
        assert_eq!(result, GuessResult::AlreadySolved);
        assert_eq!(live, before);
    }

    #[test]
    fn test_completion_tracking() {
        let p = puzzle();
        let mut live = live(&p);
        assert_eq!(live.completion_rate(), 0.0);
        live.apply_guess(&p, 7, 0, 0, 'C', 2_000);
        live.apply_guess(&p, 7, 0, 1, 'A', 2_100);
        assert!(!live.is_solved());
        assert_eq!(live.unsolved_indices(), vec![2]);
        live.apply_guess(&p, 8, 0, 2, 't', 2_200);
        assert!(live.is_solved());
        assert_eq!(live.completion_rate(), 1.0);
    }

    #[test]
    fn test_merge_grids_prefers_durable_letters() {
        assert_eq!(merge_grids("C**.", "*A*."), "CA*.");
        // Same cell solved on both sides: durable wins.
        assert_eq!(merge_grids("X**.", "Y**."), "X**.");
    }

    #[test]
    fn test_reveal_cell() {
        let p = puzzle();
        let mut live = live(&p);
        assert_eq!(live.reveal_cell(&p, 1, 5_000), Some('A'));
        assert_eq!(live.last_activity_ms, 5_000);
        assert_eq!(live.total_correct_guesses(), 0);
        // Already revealed: no-op.
        assert_eq!(live.reveal_cell(&p, 1, 6_000), None);
    }
}
