use async_trait::async_trait;
use teloxide::prelude::*;

/// Where rendered notifications go
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Sends plain text to the user's private chat
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()> {
        self.bot.send_message(ChatId(user_id), text).await?;
        Ok(())
    }
}
