/// Too Good To Go Notifier
///
/// A Telegram bot that watches the user's favorite stores and sends a message
/// when a surplus bag becomes available.
///
/// The service:
/// - Arms one randomized check at a time during opening hours (never on Sunday)
/// - Notifies each store at most once per day
/// - Pauses itself when the marketplace flags automated access
/// - Exposes trigger endpoints over HTTP and commands over Telegram

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tgtg_notifier::{app::App, bot, config, http_server, notifier::TelegramNotifier, runner, store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Too Good To Go notifier...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    let pool = cfg.connect().await?;
    cfg.validate(&pool).await?;
    store::init_schema(&pool)
        .await
        .context("Failed to create database schema")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;
    let telegram = Bot::with_client(&cfg.telegram_token, client);

    let chat_id = cfg.chat_id()?;
    let notifier = Arc::new(TelegramNotifier::new(telegram.clone(), chat_id));
    let app = Arc::new(App::from_config(&cfg, pool, notifier)?);

    let state = http_server::AppState {
        app: app.clone(),
        api_secret: cfg.trigger_api_secret.clone(),
    };
    let port = cfg.http_port;
    tokio::spawn(async move {
        if let Err(e) = http_server::start_server(state, port).await {
            log::error!("HTTP server stopped: {:?}", e);
        }
    });

    let scheduler_app = app.clone();
    let tick_minutes = cfg.scheduler_tick_minutes;
    tokio::spawn(async move {
        if let Err(e) = runner::start_scheduler_loop(scheduler_app, tick_minutes).await {
            log::error!("Scheduler loop stopped: {:?}", e);
        }
    });

    let trigger_app = app.clone();
    let poll_seconds = cfg.trigger_poll_seconds;
    tokio::spawn(async move {
        if let Err(e) = runner::start_trigger_loop(trigger_app, poll_seconds).await {
            log::error!("Trigger loop stopped: {:?}", e);
        }
    });

    // Run the bot until Ctrl+C
    bot::run_bot(telegram, chat_id, app).await?;

    Ok(())
}
