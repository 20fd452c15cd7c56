use anyhow::Result;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the room cleanup service
pub async fn run_cleanup_service(
    pool: PgPool,
    cancellation_token: CancellationToken,
) -> Result<()> {
    info!("Starting room cleanup service");

    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("Room cleanup service shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = cleanup_rooms(&pool).await {
                    error!("Failed to run room cleanup: {}", e);
                }
            }
        }
    }

    Ok(())
}

/// Perform room cleanup. Finished rooms are kept — their stats rows are the
/// players' game history — only dead weight goes.
pub async fn cleanup_rooms(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    // 1. Cancel pending rooms that never got a player
    let stale_pending = sqlx::query(
        r#"
        UPDATE rooms r
        SET status = 'cancelled'
        WHERE r.status = 'pending'
        AND r.last_activity < NOW() - INTERVAL '10 minutes'
        AND NOT EXISTS (
            SELECT 1 FROM room_players rp WHERE rp.room_id = r.id
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    if stale_pending.rows_affected() > 0 {
        info!("Cancelled {} stale pending rooms", stale_pending.rows_affected());
    }

    // 2. Delete cancelled rooms older than a day
    let cancelled_deleted = sqlx::query(
        r#"
        DELETE FROM rooms
        WHERE status = 'cancelled'
        AND last_activity < NOW() - INTERVAL '1 day'
        "#,
    )
    .execute(&mut *tx)
    .await?;

    if cancelled_deleted.rows_affected() > 0 {
        info!("Deleted {} cancelled rooms", cancelled_deleted.rows_affected());
    }

    tx.commit().await?;

    Ok(())
}
