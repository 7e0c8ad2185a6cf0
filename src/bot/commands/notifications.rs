use std::sync::Arc;
use teloxide::prelude::*;

use crate::bot::handlers::{BotContext, BotDialogue, BotState, HandlerResult};
use crate::database::models::{Notification, NotificationSettings, User};
use crate::error::ServiceError;
use crate::services::notifications::NotificationService;
use crate::services::scheduler::TaskKey;
use crate::utils::datetime::format_datetime;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::{log_task_event, log_validation_error};
use crate::utils::markdown::{bold, escape_markdown};
use crate::utils::validation::{parse_notification_id, parse_notify_args, parse_time_and_interval};

const NOT_REGISTERED: &str = "Сначала войдите в дневник: /register <логин> <пароль>";

/// Notifications reference the users row, so only registered users get one
pub(crate) async fn ensure_registered(
    feedback: &CommandFeedback,
    user_id: i64,
    ctx: &BotContext,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    if User::find_by_id(&ctx.db.pool, user_id).await?.is_some() {
        return Ok(true);
    }
    feedback.error(NOT_REGISTERED).await?;
    Ok(false)
}

fn describe(settings: &NotificationSettings) -> String {
    format!("{} ({})", settings.time.clock_label(), settings.interval.label())
}

pub async fn handle_notify(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    args: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let parsed = match parse_notify_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            log_validation_error("/notify", args, &e.to_string(), user_id);
            feedback
                .error(&format!(
                    "{}\nПример: /notify 18:00 daily stats Итоги дня",
                    e
                ))
                .await?;
            return Ok(());
        }
    };

    if !ensure_registered(&feedback, user_id, ctx).await? {
        return Ok(());
    }

    let mut settings = NotificationSettings::new(parsed.time, parsed.interval);
    settings.display_mode = parsed.display_mode;
    settings.name = parsed.name;

    let notification = ctx.notifications.create(user_id, settings).await?;
    let next = notification
        .next_fire_at
        .map(|at| format_datetime(&at, ctx.offset))
        .unwrap_or_else(|| "-".to_string());

    feedback
        .success(&format!(
            "Отправка {} «{}» сохранена: {}\nСледующая отправка: {}",
            notification.id,
            notification.settings.name,
            describe(&notification.settings),
            next
        ))
        .await?;
    Ok(())
}

pub async fn handle_list(bot: &Bot, msg: &Message, user_id: i64, ctx: &BotContext) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let names = ctx.notifications.list(user_id).await?;
    let autosend = ctx.notifications.autosend(user_id).await?;

    if names.is_empty() && autosend.is_none() {
        feedback
            .info("Отправок пока нет. Создайте: /notify 18:00 daily")
            .await?;
        return Ok(());
    }

    let mut text = bold("Ваши отправки:");
    for entry in &names {
        let next = match entry.fire_at {
            Some(at) => format_datetime(&at, ctx.offset),
            None => "не запланирована".to_string(),
        };
        text.push('\n');
        text.push_str(&format!(
            "{} {}",
            bold(&format!("{}.", entry.id)),
            escape_markdown(&format!("{}, следующая: {}", entry.name, next))
        ));
    }

    if let Some((setting, fire_at)) = autosend {
        let next = fire_at
            .map(|at| format_datetime(&at, ctx.offset))
            .unwrap_or_else(|| "не запланирована".to_string());
        text.push_str("\n\n");
        text.push_str(&escape_markdown(&format!(
            "Расписание на завтра: {} ({}), следующая: {}",
            setting.time.clock_label(),
            setting.interval.label(),
            next
        )));
    }

    feedback.send_markdown(text).await?;
    Ok(())
}

pub async fn handle_edit(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    arg: &str,
    dialogue: &BotDialogue,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let id = match parse_notification_id(arg) {
        Ok(id) => id,
        Err(e) => {
            log_validation_error("/edit", arg, &e.to_string(), user_id);
            feedback.error(&e.to_string()).await?;
            return Ok(());
        }
    };

    let original = match ctx.notifications.begin_edit(user_id, id).await {
        Ok(original) => original,
        Err(ServiceError::NotFound { .. }) => {
            feedback.error(&format!("Отправки {} нет. Список: /notifications", id)).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let current = describe(&original.settings);
    dialogue
        .update(BotState::EditingNotification { original })
        .await?;

    feedback
        .info(&format!(
            "Отправка {} сейчас: {}\nПришлите новое время: ЧЧ:ММ [once|daily|weekly|monthly]\nОтмена: /cancel",
            id, current
        ))
        .await?;
    Ok(())
}

/// Puts back the task of an edit left open when the user moved on to
/// another command
pub async fn abandon_edit(dialogue: &BotDialogue, service: &NotificationService) -> HandlerResult {
    let Some(BotState::EditingNotification { original }) = dialogue.get().await? else {
        return Ok(());
    };
    dialogue.exit().await?;

    let key = TaskKey::new(original.user_id, original.id);
    match service.abort_edit(&original).await {
        Ok(fire_at) => log_task_event("edit abandoned", key, Some(&fire_at.to_rfc3339())),
        Err(ServiceError::NotFound { .. }) => {}
        Err(e) => tracing::warn!("TASK: abandoned edit of {} not restored: {}", key, e),
    }
    Ok(())
}

/// Handles the text a user sends while an edit is open
pub async fn handle_edit_reply(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    original: Notification,
    ctx: Arc<BotContext>,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot, msg.chat.id);
    let user_id = original.user_id;

    let Some(text) = msg.text() else {
        feedback.info("Пришлите время текстом или /cancel").await?;
        return Ok(());
    };

    let (time, interval) = match parse_time_and_interval(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            log_validation_error("/edit", text, &e.to_string(), user_id);
            // stay in the edit
            feedback
                .error(&format!("{}\nПопробуйте ещё раз или /cancel", e))
                .await?;
            return Ok(());
        }
    };

    let mut settings = original.settings.clone();
    settings.time = time;
    settings.interval = interval.unwrap_or(original.settings.interval);
    let summary = describe(&settings);

    let outcome = ctx
        .notifications
        .commit_edit(user_id, original.id, settings)
        .await;
    dialogue.exit().await?;

    match outcome {
        Ok(fire_at) => {
            feedback
                .success(&format!(
                    "Отправка {} изменена: {}\nСледующая отправка: {}",
                    original.id,
                    summary,
                    format_datetime(&fire_at, ctx.offset)
                ))
                .await?;
            Ok(())
        }
        Err(ServiceError::NotFound { .. }) => {
            feedback
                .error(&format!("Отправка {} уже удалена", original.id))
                .await?;
            Ok(())
        }
        Err(e) => {
            feedback.error("Не удалось сохранить изменения").await?;
            Err(e.into())
        }
    }
}

pub async fn handle_delete(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    arg: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let id = match parse_notification_id(arg) {
        Ok(id) => id,
        Err(e) => {
            log_validation_error("/delete", arg, &e.to_string(), user_id);
            feedback.error(&e.to_string()).await?;
            return Ok(());
        }
    };

    if ctx.notifications.delete(user_id, id).await? {
        feedback.success(&format!("Отправка {} удалена", id)).await?;
    } else {
        feedback
            .error(&format!("Отправки {} нет. Список: /notifications", id))
            .await?;
    }
    Ok(())
}

pub async fn handle_cancel(
    bot: &Bot,
    msg: &Message,
    dialogue: &BotDialogue,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let Some(BotState::EditingNotification { original }) = dialogue.get().await? else {
        feedback.info("Нечего отменять").await?;
        return Ok(());
    };
    dialogue.exit().await?;

    match ctx.notifications.abort_edit(&original).await {
        Ok(fire_at) => {
            feedback
                .success(&format!(
                    "Изменение отменено. Отправка {} придёт {}",
                    original.id,
                    format_datetime(&fire_at, ctx.offset)
                ))
                .await?;
            Ok(())
        }
        Err(ServiceError::NotFound { .. }) => {
            feedback
                .info(&format!("Изменение отменено, отправка {} уже удалена", original.id))
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
