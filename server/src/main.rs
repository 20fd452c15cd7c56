use anyhow::{Context, Result};
use redis::Client;
use refinery::config::{Config, ConfigDbType};
use server::config::ServerConfig;
use server::db::Database;
use server::db::postgres::PgDatabase;
use server::game_cache::RedisLiveGameStore;
use server::notifier::RedisNotifier;
use server::redis_utils::create_connection_manager;
use server::reveal_scheduler::{RevealScheduler, TokioRevealQueue};
use server::room_cleanup;
use server::room_coordinator::RoomCoordinator;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod migrations {
    use refinery::embed_migrations;
    embed_migrations!("./migrations");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;

    // Run migrations
    let mut db_config = Config::new(ConfigDbType::Postgres)
        .set_db_host(&config.db_host)
        .set_db_port(&config.db_port)
        .set_db_user(&config.db_user)
        .set_db_pass(&config.db_pass)
        .set_db_name(&config.db_name);

    migrations::migrations::runner().run_async(&mut db_config).await?;
    info!("Database migrations completed");

    // Create database pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url())
        .await
        .context("Failed to create PostgreSQL connection pool")?;

    // Redis connection shared by the cache store and the fan-out publisher
    let redis_client =
        Client::open(config.redis_url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = create_connection_manager(redis_client).await?;

    // Wire the game core
    let db: Arc<dyn Database> = Arc::new(PgDatabase::new(db_pool.clone()));
    let cache = Arc::new(RedisLiveGameStore::new(redis_conn.clone()));
    let notifier = Arc::new(RedisNotifier::new(redis_conn));
    let queue = Arc::new(TokioRevealQueue::new());
    let coordinator =
        RoomCoordinator::new(db.clone(), cache.clone(), notifier.clone(), queue.clone());
    let scheduler = RevealScheduler::new(
        db.clone(),
        cache.clone(),
        notifier.clone(),
        coordinator.clone(),
        queue.clone(),
    );
    queue.bind(scheduler.clone());

    let cancellation_token = CancellationToken::new();
    let cleanup_handle = tokio::spawn(room_cleanup::run_cleanup_service(
        db_pool.clone(),
        cancellation_token.clone(),
    ));

    // Re-arm auto-reveal chains for rooms that were still playing when the
    // previous process stopped.
    for room_id in db.get_playing_room_ids().await? {
        if let Err(e) = scheduler.arm(room_id).await {
            error!("Failed to arm reveals for room {}: {:?}", room_id, e);
        }
    }

    info!("Server started. Waiting for shutdown signal (Ctrl+C)...");
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal. Shutting down gracefully...");
    cancellation_token.cancel();
    let _ = cleanup_handle.await;

    info!("Server shut down successfully");
    Ok(())
}
