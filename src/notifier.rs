/// Outbound notifications
///
/// Fire-and-forget delivery to the single configured recipient. Failures are
/// logged by the implementation and never reach the caller.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio::sync::Mutex;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Delivers through the Telegram bot to one chat
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        let result = self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await;

        match result {
            Ok(_) => log::info!("Telegram message sent to chat {}", self.chat_id),
            Err(e) => log::error!("Failed to send Telegram message: {}", e),
        }
    }
}

/// Keeps every message in memory, in send order
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        log::debug!("Recorded outbound message ({} chars)", text.len());
        self.sent.lock().await.push(text.to_string());
    }
}
