use anyhow::{Context, Result};
use std::env;

/// Connection settings for the durable store and the cache, read from the
/// environment (or a .env file) at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    pub redis_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let db_host = env::var("CROSSWORDS_DB_HOST")
            .context("CROSSWORDS_DB_HOST must be set in environment or .env file")?;
        let db_port = env::var("CROSSWORDS_DB_PORT")
            .context("CROSSWORDS_DB_PORT must be set in environment or .env file")?;
        let db_user = env::var("CROSSWORDS_DB_USER")
            .context("CROSSWORDS_DB_USER must be set in environment or .env file")?;
        let db_pass = env::var("CROSSWORDS_DB_PASS")
            .context("CROSSWORDS_DB_PASS must be set in environment or .env file")?;
        let db_name = env::var("CROSSWORDS_DB_NAME")
            .context("CROSSWORDS_DB_NAME must be set in environment or .env file")?;
        let redis_url = env::var("CROSSWORDS_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        Ok(ServerConfig { db_host, db_port, db_user, db_pass, db_name, redis_url })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_pass, self.db_host, self.db_port, self.db_name
        )
    }
}
