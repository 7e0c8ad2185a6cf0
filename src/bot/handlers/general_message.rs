use teloxide::prelude::*;

use super::HandlerResult;
use crate::utils::feedback::CommandFeedback;

/// Replies to text that is neither a known command nor an edit reply
pub async fn handle_general_message(bot: Bot, msg: Message) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let feedback = CommandFeedback::new(bot, msg.chat.id);

    if let Some(command) = text.split_whitespace().next().filter(|t| t.starts_with('/')) {
        feedback
            .error(&format!(
                "Не понял команду {command}: неизвестная команда или не хватает аргументов. Список команд: /help"
            ))
            .await?;
    } else if text.to_lowercase().contains("оценк") {
        feedback.info("Оценки показывает /grades, регулярная отправка настраивается через /notify").await?;
    }
    // other chatter is ignored

    Ok(())
}
