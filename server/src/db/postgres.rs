use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GameMode, Puzzle, RoomStatus, merge_grids};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use super::Database;
use super::models::{GameStats, RatingProfile, Room, RoomPlayer, User};

/// Postgres-backed durable store.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        PgDatabase { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn get_room_players(&self, room_id: i32) -> Result<Vec<RoomPlayer>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, team_id
            FROM room_players
            WHERE room_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load room players")?;

        rows.iter().map(player_from_row).collect()
    }
}

const ROOM_COLUMNS: &str =
    "id, status, mode, puzzle_id, found_letters, scores, created_at, finished_at, last_activity";

fn player_from_row(row: &PgRow) -> Result<RoomPlayer> {
    Ok(RoomPlayer { user_id: row.try_get("user_id")?, team_id: row.try_get("team_id")? })
}

fn room_from_row(row: &PgRow, players: Vec<RoomPlayer>) -> Result<Room> {
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("mode")?;
    let scores: serde_json::Value = row.try_get("scores")?;
    Ok(Room {
        id: row.try_get("id")?,
        status: RoomStatus::parse(&status).ok_or_else(|| anyhow!("Unknown room status '{}'", status))?,
        mode: GameMode::parse(&mode).ok_or_else(|| anyhow!("Unknown game mode '{}'", mode))?,
        puzzle_id: row.try_get("puzzle_id")?,
        found_letters: row.try_get("found_letters")?,
        scores: serde_json::from_value(scores).context("Failed to deserialize room scores")?,
        players,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
        last_activity: row.try_get("last_activity")?,
    })
}

fn scores_to_json(scores: &HashMap<i32, i32>) -> Result<serde_json::Value> {
    serde_json::to_value(scores).context("Failed to serialize scores")
}

#[async_trait]
impl Database for PgDatabase {
    async fn create_room(&self, mode: GameMode, puzzle_id: i32, found_letters: &str) -> Result<Room> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO rooms (status, mode, puzzle_id, found_letters, scores)
            VALUES ('pending', $1, $2, $3, '{{}}')
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(mode.as_str())
        .bind(puzzle_id)
        .bind(found_letters)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create room")?;

        room_from_row(&row, Vec::new())
    }

    async fn add_player_to_room(&self, room_id: i32, user_id: i32, team_id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO room_players (room_id, user_id, team_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(team_id)
        .execute(&mut *tx)
        .await
        .context("Failed to add player to room")?;

        // The scores map carries exactly one entry per participant.
        sqlx::query(
            r#"
            UPDATE rooms
            SET scores = scores || jsonb_build_object($1::text, 0)
            WHERE id = $2 AND NOT scores ? $1::text
            "#,
        )
        .bind(user_id.to_string())
        .bind(room_id)
        .execute(&mut *tx)
        .await
        .context("Failed to seed player score")?;

        // Stats rows exist from the moment a player joins.
        sqlx::query(
            r#"
            INSERT INTO game_stats (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to create stats row")?;

        tx.commit().await.context("Failed to commit player join")?;
        Ok(())
    }

    async fn get_room(&self, room_id: i32) -> Result<Option<Room>> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"))
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load room")?;

        match row {
            Some(row) => {
                let players = self.get_room_players(room_id).await?;
                Ok(Some(room_from_row(&row, players)?))
            }
            None => Ok(None),
        }
    }

    async fn start_room(&self, room_id: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rooms
            SET status = 'playing', last_activity = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(room_id)
        .execute(&self.pool)
        .await
        .context("Failed to start room")?;
        Ok(())
    }

    async fn update_room_progress(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        last_activity: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rooms
            SET found_letters = $1, scores = $2, last_activity = $3
            WHERE id = $4
            "#,
        )
        .bind(found_letters)
        .bind(scores_to_json(scores)?)
        .bind(last_activity)
        .bind(room_id)
        .execute(&self.pool)
        .await
        .context("Failed to persist room progress")?;
        Ok(())
    }

    async fn finalize_room(
        &self,
        room_id: i32,
        found_letters: &str,
        scores: &HashMap<i32, i32>,
        stats: &[GameStats],
    ) -> Result<Room> {
        let mut tx = self.pool.begin().await.context("Failed to begin finalize transaction")?;

        let row = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1 FOR UPDATE"
        ))
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock room row")?
        .ok_or_else(|| anyhow!("Room {} disappeared before finalization", room_id))?;

        let player_rows = sqlx::query(
            r#"
            SELECT user_id, team_id
            FROM room_players
            WHERE room_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(room_id)
        .fetch_all(&mut *tx)
        .await?;
        let players = player_rows.iter().map(player_from_row).collect::<Result<Vec<_>>>()?;

        let mut room = room_from_row(&row, players)?;

        // Merge the cached mutations into the locked row; the durable grid
        // wins where both sides carry a letter.
        let merged_grid = merge_grids(&room.found_letters, found_letters);
        let mut merged_scores = room.scores.clone();
        for (&user_id, &score) in scores {
            merged_scores.insert(user_id, score);
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE rooms
            SET status = 'finished', found_letters = $1, scores = $2,
                finished_at = $3, last_activity = $3
            WHERE id = $4
            "#,
        )
        .bind(&merged_grid)
        .bind(scores_to_json(&merged_scores)?)
        .bind(now)
        .bind(room_id)
        .execute(&mut *tx)
        .await
        .context("Failed to finish room")?;

        for entry in stats {
            sqlx::query(
                r#"
                INSERT INTO game_stats
                    (room_id, user_id, correct_guesses, incorrect_guesses, guess_details,
                     is_winner, win_streak, rating_before, rating_change, finalized_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (room_id, user_id) DO UPDATE SET
                    correct_guesses = EXCLUDED.correct_guesses,
                    incorrect_guesses = EXCLUDED.incorrect_guesses,
                    guess_details = EXCLUDED.guess_details,
                    is_winner = EXCLUDED.is_winner,
                    win_streak = EXCLUDED.win_streak,
                    rating_before = EXCLUDED.rating_before,
                    rating_change = EXCLUDED.rating_change,
                    finalized_at = EXCLUDED.finalized_at
                "#,
            )
            .bind(entry.room_id)
            .bind(entry.user_id)
            .bind(entry.correct_guesses as i32)
            .bind(entry.incorrect_guesses as i32)
            .bind(serde_json::to_value(&entry.guess_details).context("Failed to serialize guess details")?)
            .bind(entry.is_winner)
            .bind(entry.win_streak)
            .bind(entry.rating_before)
            .bind(entry.rating_change)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to finalize stats row")?;

            sqlx::query(
                r#"
                UPDATE users
                SET games_played = games_played + 1, win_streak = $1
                WHERE id = $2
                "#,
            )
            .bind(entry.win_streak)
            .bind(entry.user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to advance user game counters")?;
        }

        // Dropping the transaction on any error above rolls everything back.
        tx.commit().await.context("Failed to commit finalize transaction")?;

        room.status = RoomStatus::Finished;
        room.found_letters = merged_grid;
        room.scores = merged_scores;
        room.finished_at = Some(now);
        room.last_activity = now;
        Ok(room)
    }

    async fn delete_room(&self, room_id: i32) -> Result<()> {
        sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete room")?;
        Ok(())
    }

    async fn get_playing_room_ids(&self) -> Result<Vec<i32>> {
        let rows = sqlx::query("SELECT id FROM rooms WHERE status = 'playing' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list playing rooms")?;
        rows.iter().map(|row| row.try_get("id").map_err(Into::into)).collect()
    }

    async fn get_puzzle(&self, puzzle_id: i32) -> Result<Option<Puzzle>> {
        let row = sqlx::query("SELECT id, width, height, solution FROM puzzles WHERE id = $1")
            .bind(puzzle_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load puzzle")?;

        match row {
            Some(row) => {
                let width: i16 = row.try_get("width")?;
                let height: i16 = row.try_get("height")?;
                let solution: String = row.try_get("solution")?;
                Ok(Some(Puzzle::new(row.try_get("id")?, width as u16, height as u16, &solution)?))
            }
            None => Ok(None),
        }
    }

    async fn create_user(&self, username: &str, rating: i32) -> Result<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, rating)
            VALUES ($1, $2)
            RETURNING id, username, rating, games_played, win_streak, created_at
            "#,
        )
        .bind(username)
        .bind(rating)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create user")?;

        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            rating: row.try_get("rating")?,
            games_played: row.try_get("games_played")?,
            win_streak: row.try_get("win_streak")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn get_rating_profiles(&self, user_ids: &[i32]) -> Result<HashMap<i32, RatingProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rating, games_played, win_streak
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(user_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load rating profiles")?;

        let mut profiles = HashMap::new();
        for row in rows {
            profiles.insert(
                row.try_get("id")?,
                RatingProfile {
                    rating: row.try_get("rating")?,
                    games_played: row.try_get("games_played")?,
                    win_streak: row.try_get("win_streak")?,
                },
            );
        }
        Ok(profiles)
    }

    async fn update_user_rating(&self, user_id: i32, rating: i32) -> Result<()> {
        sqlx::query("UPDATE users SET rating = $1 WHERE id = $2")
            .bind(rating)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update user rating")?;
        Ok(())
    }

    async fn record_rating_change(&self, room_id: i32, user_id: i32, rating_change: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE game_stats
            SET rating_change = $1
            WHERE room_id = $2 AND user_id = $3
            "#,
        )
        .bind(rating_change)
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to record rating change")?;
        Ok(())
    }
}
