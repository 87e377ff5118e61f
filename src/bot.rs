/// Telegram bot module
///
/// This module sets up and runs the Telegram bot using the teloxide framework.
/// Only the configured chat is served; updates from anywhere else are dropped.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{prelude::*, types::Me, utils::command::BotCommands};
use tokio::time::sleep;

use crate::app::App;
use crate::handlers::{
    handle_about_command, handle_help_command, handle_notifications_command,
    handle_register_command, handle_resume_command, handle_settings_command, handle_start_command,
    handle_status_command,
};

/// Bot commands that users can use
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot and see welcome message")]
    Start,
    #[command(description = "Show help information")]
    Help,
    #[command(description = "Show monitoring state")]
    Status,
    #[command(description = "Lift the anti-bot pause")]
    Resume,
    #[command(description = "Request new credentials by email")]
    Register,
    #[command(description = "Show notification settings")]
    Settings,
    #[command(rename = "notifications_start", description = "Turn notifications on")]
    NotificationsStart,
    #[command(rename = "notifications_stop", description = "Turn notifications off")]
    NotificationsStop,
    #[command(description = "About this bot")]
    About,
}

/// Chat the bot answers to
#[derive(Clone, Copy)]
struct AllowedChat(ChatId);

/// Initialize and run the Telegram bot dispatcher
pub async fn run_bot(bot: Bot, chat_id: i64, app: Arc<App>) -> Result<()> {
    log::info!("Initializing bot...");

    let me = retry_get_me(&bot)
        .await
        .context("Failed to connect to Telegram API after multiple retries")?;
    log::info!("Bot started: @{}", me.username());

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let handler = Update::filter_message()
        .filter(|msg: Message, allowed: AllowedChat| {
            let ok = msg.chat.id == allowed.0;
            if !ok {
                log::warn!("Ignoring message from unknown chat {}", msg.chat.id);
            }
            ok
        })
        .filter_command::<Command>()
        .endpoint(
            |bot: Bot, msg: Message, cmd: Command, app: Arc<App>| async move {
                log::info!("Command received in chat {}", msg.chat.id);
                let result = match cmd {
                    Command::Start => handle_start_command(bot, msg).await,
                    Command::Help => handle_help_command(bot, msg).await,
                    Command::Status => handle_status_command(bot, msg, &app).await,
                    Command::Resume => handle_resume_command(bot, msg, &app).await,
                    Command::Register => handle_register_command(bot, msg, &app).await,
                    Command::Settings => handle_settings_command(bot, msg, &app).await,
                    Command::NotificationsStart => {
                        handle_notifications_command(bot, msg, &app, true).await
                    }
                    Command::NotificationsStop => {
                        handle_notifications_command(bot, msg, &app, false).await
                    }
                    Command::About => handle_about_command(bot, msg).await,
                };
                if let Err(e) = result {
                    log::error!("Error handling command: {:?}", e);
                }
                respond(())
            },
        );

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app, AllowedChat(ChatId(chat_id)), me])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build();

    log::info!("Bot is running. Press Ctrl+C to stop.");
    dispatcher.dispatch().await;

    Ok(())
}

/// Retry getting bot info with exponential backoff
async fn retry_get_me(bot: &Bot) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e) if attempt == max_retries => {
                anyhow::bail!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
            }
            Err(e) => {
                log::warn!(
                    "Failed to connect to Telegram API (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }

    anyhow::bail!("Telegram API retries exhausted")
}
