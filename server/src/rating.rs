use crate::db::Database;
use crate::db::models::{RatingProfile, Room};
use anyhow::Result;
use common::{
    BASE_K_FACTOR, GameMode, MAX_WIN_STREAK_BONUS, RATING_DAMPENING_GAMES, WIN_STREAK_BONUS_STEP,
};
use std::collections::HashMap;
use tracing::{error, info};

/// Compute and persist new ratings for every participant of a completed
/// room. Pure relative to the supplied profiles; writes go through atomic
/// per-user updates, and a failed row is logged and skipped rather than
/// unwinding the finished game.
pub async fn update_ratings(
    db: &dyn Database,
    room: &Room,
    final_scores: &HashMap<i32, i32>,
    profiles: &HashMap<i32, RatingProfile>,
) -> Result<HashMap<i32, i32>> {
    let new_ratings = compute_new_ratings(room, final_scores, profiles);

    for (&user_id, &new_rating) in &new_ratings {
        let old_rating = profiles.get(&user_id).copied().unwrap_or_default().rating;
        let delta = new_rating - old_rating;
        if delta == 0 {
            info!("User {} rating unchanged in room {}", user_id, room.id);
        }

        if let Err(e) = db.update_user_rating(user_id, new_rating).await {
            error!("Failed to update rating for user {} in room {}: {:?}", user_id, room.id, e);
            continue;
        }
        info!(
            "User {} rating: {} -> {} ({}{}) from room {}",
            user_id,
            old_rating,
            new_rating,
            if delta >= 0 { "+" } else { "" },
            delta,
            room.id
        );

        if let Err(e) = db.record_rating_change(room.id, user_id, delta).await {
            error!(
                "Failed to record rating change for user {} in room {}: {:?}",
                user_id, room.id, e
            );
        }
    }

    Ok(new_ratings)
}

/// Pure rating computation, dispatched once per game end on the room's
/// mode. Time-trial runs have no opponents and leave ratings alone.
pub fn compute_new_ratings(
    room: &Room,
    final_scores: &HashMap<i32, i32>,
    profiles: &HashMap<i32, RatingProfile>,
) -> HashMap<i32, i32> {
    match room.mode {
        GameMode::TimeTrial => HashMap::new(),
        GameMode::OneVsOne => compute_head_to_head(room, final_scores, profiles),
        GameMode::TwoVsTwo => compute_team(room, final_scores, profiles),
        GameMode::FreeForAll => compute_free_for_all(room, final_scores, profiles),
    }
}

/// Expected score of a player rated `rating` against `opponent`.
fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Dynamic K-factor: new players move fast, long win streaks accelerate
/// movement up to a capped bonus.
fn k_factor(profile: &RatingProfile) -> f64 {
    let games_dampening =
        (RATING_DAMPENING_GAMES / (profile.games_played.max(1) as f64)).max(1.0);
    let streak_bonus =
        (profile.win_streak as f64 * WIN_STREAK_BONUS_STEP).min(MAX_WIN_STREAK_BONUS);
    BASE_K_FACTOR * games_dampening * (1.0 + streak_bonus)
}

/// 1 for a strictly higher score, 0.5 for a tie, 0 otherwise.
fn actual_outcome(score: i32, opponent_score: i32) -> f64 {
    match score.cmp(&opponent_score) {
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Equal => 0.5,
        std::cmp::Ordering::Less => 0.0,
    }
}

fn profile_of(profiles: &HashMap<i32, RatingProfile>, user_id: i32) -> RatingProfile {
    profiles.get(&user_id).copied().unwrap_or_default()
}

fn score_of(scores: &HashMap<i32, i32>, user_id: i32) -> i32 {
    scores.get(&user_id).copied().unwrap_or(0)
}

fn compute_head_to_head(
    room: &Room,
    final_scores: &HashMap<i32, i32>,
    profiles: &HashMap<i32, RatingProfile>,
) -> HashMap<i32, i32> {
    let players = room.player_ids();
    let mut new_ratings = HashMap::new();
    if players.len() != 2 {
        error!("Head-to-head room {} has {} players", room.id, players.len());
        return new_ratings;
    }

    for (player, opponent) in [(players[0], players[1]), (players[1], players[0])] {
        let profile = profile_of(profiles, player);
        let opponent_rating = profile_of(profiles, opponent).rating as f64;
        let expected = expected_score(profile.rating as f64, opponent_rating);
        let actual = actual_outcome(score_of(final_scores, player), score_of(final_scores, opponent));
        let new_rating = profile.rating as f64 + k_factor(&profile) * (actual - expected);
        new_ratings.insert(player, new_rating.round() as i32);
    }
    new_ratings
}

fn compute_team(
    room: &Room,
    final_scores: &HashMap<i32, i32>,
    profiles: &HashMap<i32, RatingProfile>,
) -> HashMap<i32, i32> {
    // Partition the roster and pool each team's score and mean rating.
    let mut teams: HashMap<i32, Vec<i32>> = HashMap::new();
    for player in &room.players {
        teams.entry(player.team_id).or_default().push(player.user_id);
    }
    let mut new_ratings = HashMap::new();
    if teams.len() != 2 {
        error!("Team room {} has {} teams", room.id, teams.len());
        return new_ratings;
    }

    let team_rating = |members: &[i32]| -> f64 {
        members.iter().map(|&m| profile_of(profiles, m).rating as f64).sum::<f64>()
            / members.len() as f64
    };
    let team_score =
        |members: &[i32]| -> i32 { members.iter().map(|&m| score_of(final_scores, m)).sum() };

    let team_ids: Vec<i32> = teams.keys().copied().collect();
    for (&own, &other) in [(&team_ids[0], &team_ids[1]), (&team_ids[1], &team_ids[0])] {
        let members = &teams[&own];
        let opponents = &teams[&other];
        let opponent_mean = team_rating(opponents);
        let actual = actual_outcome(team_score(members), team_score(opponents));
        for &member in members {
            let profile = profile_of(profiles, member);
            let expected = expected_score(profile.rating as f64, opponent_mean);
            let new_rating = profile.rating as f64 + k_factor(&profile) * (actual - expected);
            new_ratings.insert(member, new_rating.round() as i32);
        }
    }
    new_ratings
}

fn compute_free_for_all(
    room: &Room,
    final_scores: &HashMap<i32, i32>,
    profiles: &HashMap<i32, RatingProfile>,
) -> HashMap<i32, i32> {
    let players = room.player_ids();
    let mut new_ratings = HashMap::new();
    if players.len() < 2 {
        return new_ratings;
    }

    for &player in &players {
        let profile = profile_of(profiles, player);
        let mut expected_sum = 0.0;
        let mut actual_sum = 0.0;
        for &opponent in &players {
            if opponent == player {
                continue;
            }
            expected_sum += expected_score(
                profile.rating as f64,
                profile_of(profiles, opponent).rating as f64,
            );
            actual_sum +=
                actual_outcome(score_of(final_scores, player), score_of(final_scores, opponent));
        }
        let opponents = (players.len() - 1) as f64;
        let expected = expected_sum / opponents;
        let actual = actual_sum / opponents;
        let new_rating = profile.rating as f64 + k_factor(&profile) * (actual - expected);
        new_ratings.insert(player, new_rating.round() as i32);
    }
    new_ratings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RoomPlayer;
    use chrono::Utc;
    use common::RoomStatus;

    fn room(mode: GameMode, players: &[(i32, i32)]) -> Room {
        Room {
            id: 1,
            status: RoomStatus::Finished,
            mode,
            puzzle_id: 1,
            found_letters: String::new(),
            scores: HashMap::new(),
            players: players
                .iter()
                .map(|&(user_id, team_id)| RoomPlayer { user_id, team_id })
                .collect(),
            created_at: Utc::now(),
            finished_at: Some(Utc::now()),
            last_activity: Utc::now(),
        }
    }

    fn profile(rating: i32, games_played: i32, win_streak: i32) -> RatingProfile {
        RatingProfile { rating, games_played, win_streak }
    }

    #[test]
    fn test_expected_score_symmetry() {
        let e = expected_score(1000.0, 1000.0);
        assert!((e - 0.5).abs() < 1e-9);
        let high = expected_score(1400.0, 1000.0);
        let low = expected_score(1000.0, 1400.0);
        assert!((high + low - 1.0).abs() < 1e-9);
        assert!(high > 0.9);
    }

    #[test]
    fn test_draw_between_equals_conserves_ratings() {
        let room = room(GameMode::OneVsOne, &[(1, 0), (2, 1)]);
        let scores = HashMap::from([(1, 40), (2, 40)]);
        let profiles = HashMap::from([(1, profile(1000, 50, 0)), (2, profile(1000, 50, 0))]);
        let ratings = compute_new_ratings(&room, &scores, &profiles);
        assert_eq!(ratings[&1], 1000);
        assert_eq!(ratings[&2], 1000);
    }

    #[test]
    fn test_head_to_head_win_moves_both() {
        let room = room(GameMode::OneVsOne, &[(1, 0), (2, 1)]);
        let scores = HashMap::from([(1, 60), (2, 20)]);
        let profiles = HashMap::from([(1, profile(1000, 50, 0)), (2, profile(1000, 50, 0))]);
        let ratings = compute_new_ratings(&room, &scores, &profiles);
        assert!(ratings[&1] > 1000);
        assert!(ratings[&2] < 1000);
        // Equal K on both sides keeps the exchange symmetric.
        assert_eq!(ratings[&1] - 1000, 1000 - ratings[&2]);
    }

    #[test]
    fn test_win_streak_bonus_is_capped() {
        let hot = profile(1000, 50, 10);
        let very_hot = profile(1000, 50, 100);
        let capped = BASE_K_FACTOR * (1.0 + MAX_WIN_STREAK_BONUS);
        assert!((k_factor(&hot) - capped).abs() < 1e-9);
        assert!((k_factor(&very_hot) - capped).abs() < 1e-9);
        assert!(k_factor(&profile(1000, 50, 1)) < capped);
    }

    #[test]
    fn test_new_players_swing_harder() {
        let room = room(GameMode::OneVsOne, &[(1, 0), (2, 1)]);
        let scores = HashMap::from([(1, 60), (2, 20)]);
        let profiles = HashMap::from([(1, profile(1000, 0, 0)), (2, profile(1000, 200, 0))]);
        let ratings = compute_new_ratings(&room, &scores, &profiles);
        let newcomer_gain = ratings[&1] - 1000;
        let veteran_loss = 1000 - ratings[&2];
        assert!(newcomer_gain > veteran_loss);
        assert!(newcomer_gain >= veteran_loss * 10);
    }

    #[test]
    fn test_team_members_rated_against_opposing_mean() {
        let room = room(GameMode::TwoVsTwo, &[(1, 0), (2, 0), (3, 1), (4, 1)]);
        let scores = HashMap::from([(1, 30), (2, 30), (3, 10), (4, 10)]);
        let profiles = HashMap::from([
            (1, profile(1200, 50, 0)),
            (2, profile(800, 50, 0)),
            (3, profile(1000, 50, 0)),
            (4, profile(1000, 50, 0)),
        ]);
        let ratings = compute_new_ratings(&room, &scores, &profiles);
        // Whole winning team gains, whole losing team drops.
        assert!(ratings[&1] > 1200);
        assert!(ratings[&2] > 800);
        assert!(ratings[&3] < 1000);
        assert!(ratings[&4] < 1000);
        // The underdog teammate gains more than the favorite against the
        // same opposing mean.
        assert!(ratings[&2] - 800 > ratings[&1] - 1200);
    }

    #[test]
    fn test_free_for_all_middle_placement_stays_put() {
        let room = room(GameMode::FreeForAll, &[(1, 0), (2, 0), (3, 0)]);
        let scores = HashMap::from([(1, 50), (2, 30), (3, 10)]);
        let profiles = HashMap::from([
            (1, profile(1000, 50, 0)),
            (2, profile(1000, 50, 0)),
            (3, profile(1000, 50, 0)),
        ]);
        let ratings = compute_new_ratings(&room, &scores, &profiles);
        assert!(ratings[&1] > 1000);
        // One win, one loss against equals: expected equals actual.
        assert_eq!(ratings[&2], 1000);
        assert!(ratings[&3] < 1000);
    }

    #[test]
    fn test_time_trial_leaves_ratings_alone() {
        let room = room(GameMode::TimeTrial, &[(1, 0)]);
        let scores = HashMap::from([(1, 90)]);
        let profiles = HashMap::from([(1, profile(1000, 3, 2))]);
        assert!(compute_new_ratings(&room, &scores, &profiles).is_empty());
    }
}
