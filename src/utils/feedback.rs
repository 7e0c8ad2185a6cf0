use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};

use crate::utils::markdown::escape_markdown;

/// Kind of a command reply, shown as a leading emoji
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackType {
    Success,
    Error,
    Info,
    Processing,
}

impl FeedbackType {
    fn emoji(self) -> &'static str {
        match self {
            FeedbackType::Success => "✅",
            FeedbackType::Error => "❌",
            FeedbackType::Info => "ℹ️",
            FeedbackType::Processing => "⏳",
        }
    }
}

/// MarkdownV2 text of a reply; `message` is escaped
pub fn format_feedback(kind: FeedbackType, message: &str) -> String {
    format!("{} {}", kind.emoji(), escape_markdown(message))
}

/// Replies to one chat with consistently formatted messages
pub struct CommandFeedback {
    bot: Bot,
    chat_id: ChatId,
}

impl CommandFeedback {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }

    pub async fn send(&self, kind: FeedbackType, message: &str) -> ResponseResult<Message> {
        self.bot
            .send_message(self.chat_id, format_feedback(kind, message))
            .parse_mode(ParseMode::MarkdownV2)
            .await
    }

    /// Sends already formatted MarkdownV2
    pub async fn send_markdown(&self, text: String) -> ResponseResult<Message> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await
    }

    /// Replaces the text of an earlier reply, e.g. a "processing" one
    pub async fn update(&self, message_id: MessageId, kind: FeedbackType, message: &str) -> ResponseResult<Message> {
        self.bot
            .edit_message_text(self.chat_id, message_id, format_feedback(kind, message))
            .parse_mode(ParseMode::MarkdownV2)
            .await
    }

    pub async fn success(&self, message: &str) -> ResponseResult<Message> {
        self.send(FeedbackType::Success, message).await
    }

    pub async fn error(&self, message: &str) -> ResponseResult<Message> {
        self.send(FeedbackType::Error, message).await
    }

    pub async fn info(&self, message: &str) -> ResponseResult<Message> {
        self.send(FeedbackType::Info, message).await
    }

    pub async fn processing(&self, message: &str) -> ResponseResult<Message> {
        self.send(FeedbackType::Processing, message).await
    }
}
