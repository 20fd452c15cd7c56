use crate::db::Database;
use crate::game_cache::{LiveGameStore, load_or_init};
use crate::notifier::Notifier;
use crate::room_coordinator::{RoomCoordinator, snapshot_from_live, snapshot_from_room};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    INITIAL_REVEAL_DELAY_MS, MIN_REVEAL_DELAY_MS, REVEAL_ACCELERATION_RATE,
    REVEAL_COMPLETION_STEP, RevealedLetter, RoomEvent, RoomStatus,
};
use once_cell::sync::OnceCell;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payload of one scheduled auto-reveal tick. `last_activity_ms` is the
/// activity witness captured when the job was enqueued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealJob {
    pub room_id: i32,
    pub last_activity_ms: i64,
}

/// Unique job id embedding the room and a random suffix, so superseded
/// jobs are distinguishable from their replacements.
pub fn reveal_job_id(room_id: i32) -> String {
    format!("reveal:{}:{}", room_id, Uuid::new_v4().simple())
}

/// Delayed-job seam for the auto-reveal chain.
#[async_trait]
pub trait RevealQueue: Send + Sync {
    /// Schedule a tick after `delay`. A pending job for the same room is
    /// superseded — one active timer per room.
    async fn enqueue(&self, job_id: &str, job: RevealJob, delay: Duration) -> anyhow::Result<()>;
    /// Drop any pending job for the room. In-flight ticks are never
    /// interrupted, only future ones.
    async fn cancel_room(&self, room_id: i32) -> anyhow::Result<()>;
}

/// Receiver side of the queue: the scheduler implements this.
#[async_trait]
pub trait RevealHandler: Send + Sync {
    async fn handle(&self, job: RevealJob);
}

struct PendingJob {
    job_id: String,
    cancel: CancellationToken,
}

struct QueueInner {
    handler: OnceCell<Arc<dyn RevealHandler>>,
    pending: Mutex<HashMap<i32, PendingJob>>,
}

/// Generic delayed-task runner on tokio timers: one sleeping task per
/// room, latest enqueue wins. All reveal timing policy lives in
/// [`RevealScheduler`]; this type only sleeps and dispatches.
#[derive(Clone)]
pub struct TokioRevealQueue {
    inner: Arc<QueueInner>,
}

impl TokioRevealQueue {
    pub fn new() -> Self {
        TokioRevealQueue {
            inner: Arc::new(QueueInner {
                handler: OnceCell::new(),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bind the tick handler. Called once during wiring; jobs that fire
    /// before a handler exists are dropped with a warning.
    pub fn bind(&self, handler: Arc<dyn RevealHandler>) {
        if self.inner.handler.set(handler).is_err() {
            warn!("Reveal queue handler was already bound");
        }
    }
}

impl Default for TokioRevealQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevealQueue for TokioRevealQueue {
    async fn enqueue(&self, job_id: &str, job: RevealJob, delay: Duration) -> Result<()> {
        let token = CancellationToken::new();
        {
            let mut pending = self.inner.pending.lock().await;
            if let Some(previous) = pending.insert(
                job.room_id,
                PendingJob { job_id: job_id.to_string(), cancel: token.clone() },
            ) {
                previous.cancel.cancel();
            }
        }

        let inner = self.inner.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            {
                let mut pending = inner.pending.lock().await;
                match pending.get(&job.room_id) {
                    Some(current) if current.job_id == job_id => {
                        pending.remove(&job.room_id);
                    }
                    // Superseded while sleeping.
                    _ => return,
                }
            }
            match inner.handler.get() {
                Some(handler) => handler.handle(job).await,
                None => warn!("Reveal job {} fired before a handler was bound", job_id),
            }
        });
        Ok(())
    }

    async fn cancel_room(&self, room_id: i32) -> Result<()> {
        if let Some(pending) = self.inner.pending.lock().await.remove(&room_id) {
            pending.cancel.cancel();
            debug!("Cancelled pending reveal job for room {}", room_id);
        }
        Ok(())
    }
}

/// Pure delay curve: the fuller the grid, the shorter the wait until the
/// next automatic reveal, floored at the minimum delay.
pub fn next_reveal_delay(completion_rate: f64) -> Duration {
    let steps = (completion_rate / REVEAL_COMPLETION_STEP).floor();
    let delay = INITIAL_REVEAL_DELAY_MS as f64 * (1.0 - REVEAL_ACCELERATION_RATE).powf(steps);
    Duration::from_millis(delay.max(MIN_REVEAL_DELAY_MS as f64) as u64)
}

/// The inactivity worker. Wakes per room on its own timer, reveals one
/// letter when nobody has played since the job was scheduled, and keeps
/// rescheduling itself with a shrinking delay until the room leaves
/// `playing`. There is no lock shared with the guess path — staleness is
/// detected through the activity witness, not prevented.
pub struct RevealScheduler {
    db: Arc<dyn Database>,
    cache: Arc<dyn LiveGameStore>,
    notifier: Arc<dyn Notifier>,
    coordinator: Arc<RoomCoordinator>,
    queue: Arc<dyn RevealQueue>,
}

impl RevealScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        cache: Arc<dyn LiveGameStore>,
        notifier: Arc<dyn Notifier>,
        coordinator: Arc<RoomCoordinator>,
        queue: Arc<dyn RevealQueue>,
    ) -> Arc<Self> {
        Arc::new(RevealScheduler { db, cache, notifier, coordinator, queue })
    }

    /// Arm the reveal chain for a room: schedules the first tick with the
    /// current cache activity timestamp as witness. Safe to call for rooms
    /// that are not playing — those are skipped.
    pub async fn arm(&self, room_id: i32) -> Result<()> {
        let room = match self.db.get_room(room_id).await? {
            Some(room) => room,
            None => return Err(anyhow!("Cannot arm reveals for missing room {}", room_id)),
        };
        if room.status != RoomStatus::Playing {
            debug!("Not arming reveals for room {} in status {:?}", room_id, room.status);
            return Ok(());
        }
        let live = load_or_init(self.cache.as_ref(), &room).await?;
        let delay = next_reveal_delay(live.completion_rate());
        info!("Armed auto-reveal for room {} in {:?}", room_id, delay);
        self.schedule(RevealJob { room_id, last_activity_ms: live.last_activity_ms }, delay)
            .await;
        Ok(())
    }

    /// Enqueue the next tick, retrying exactly once with a halved delay.
    /// A second failure is logged and the room is left un-armed until the
    /// next external arm.
    async fn schedule(&self, job: RevealJob, delay: Duration) {
        let job_id = reveal_job_id(job.room_id);
        if let Err(e) = self.queue.enqueue(&job_id, job, delay).await {
            warn!(
                "Failed to schedule reveal for room {}: {:?}; retrying with shortened delay",
                job.room_id, e
            );
            let retry_id = reveal_job_id(job.room_id);
            if let Err(e) = self.queue.enqueue(&retry_id, job, delay / 2).await {
                error!("Giving up scheduling reveals for room {}: {:?}", job.room_id, e);
            }
        }
    }

    /// One tick of the auto-reveal state machine.
    pub async fn run_tick(&self, job: RevealJob) -> Result<()> {
        let room = match self.db.get_room(job.room_id).await? {
            Some(room) => room,
            None => {
                debug!("Room {} is gone, dropping reveal chain", job.room_id);
                return Ok(());
            }
        };
        if room.status != RoomStatus::Playing {
            debug!("Room {} left playing, dropping reveal chain", job.room_id);
            return Ok(());
        }
        let puzzle = self
            .db
            .get_puzzle(room.puzzle_id)
            .await?
            .ok_or_else(|| anyhow!("Puzzle {} not found for room {}", room.puzzle_id, room.id))?;

        let mut live = load_or_init(self.cache.as_ref(), &room).await?;
        let next_delay = next_reveal_delay(live.completion_rate());

        // The witness gate: if the cache's activity timestamp moved since
        // this job was scheduled, a player got there first. Skip the
        // reveal, keep the chain alive.
        let mut finished = false;
        if live.last_activity_ms != job.last_activity_ms {
            debug!(
                "Suppressing reveal for room {}: activity {} superseded witness {}",
                room.id, live.last_activity_ms, job.last_activity_ms
            );
        } else {
            let unsolved = live.unsolved_indices();
            if !unsolved.is_empty() {
                let idx = unsolved[rand::thread_rng().gen_range(0..unsolved.len())];
                let now_ms = Utc::now().timestamp_millis();
                if let Some(letter) = live.reveal_cell(&puzzle, idx, now_ms) {
                    let row = (idx / puzzle.width as usize) as u16;
                    let col = (idx % puzzle.width as usize) as u16;
                    finished = live.is_solved();

                    let snapshot = if finished {
                        let finished_room =
                            self.coordinator.on_game_end(&room, &live, None).await?;
                        snapshot_from_room(&finished_room, live.last_activity_ms)
                    } else {
                        self.db
                            .update_room_progress(
                                room.id,
                                &live.grid_string(),
                                &live.scores,
                                Utc::now(),
                            )
                            .await?;
                        self.cache.put(room.id, &live).await?;
                        snapshot_from_live(&room, &live)
                    };

                    info!(
                        "Auto-revealed ({}, {}) in room {} ({:.0}% complete)",
                        row,
                        col,
                        room.id,
                        live.completion_rate() * 100.0
                    );
                    self.notifier
                        .publish_room(
                            room.id,
                            &RoomEvent::GameInactive {
                                completion_rate: live.completion_rate(),
                                next_timeout: next_delay.as_millis() as u64,
                                revealed_letter: RevealedLetter { row, col, letter },
                                is_game_finished: finished,
                            },
                        )
                        .await?;
                    self.notifier
                        .publish_room(room.id, &RoomEvent::Room { room: snapshot })
                        .await?;
                }
            }
        }

        if !finished {
            self.schedule(
                RevealJob { room_id: room.id, last_activity_ms: live.last_activity_ms },
                next_delay,
            )
            .await;
        }
        Ok(())
    }
}

#[async_trait]
impl RevealHandler for RevealScheduler {
    async fn handle(&self, job: RevealJob) {
        if let Err(e) = self.run_tick(job).await {
            error!("Auto-reveal tick failed for room {}: {:?}", job.room_id, e);
        }
    }
}
