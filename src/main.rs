use std::sync::Arc;

use log::{error, info};
use polly::config::Config;
use polly::db::Database;
use polly::tasks;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::connect(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let sweeper = tokio::spawn(tasks::poll_ender::check_expired_polls_task(
        Arc::clone(&database),
        config.sweep_interval,
    ));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    sweeper.abort();
    database.pool().close().await;
}
