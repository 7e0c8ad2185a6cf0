use teloxide::prelude::*;

use super::notifications::ensure_registered;
use crate::bot::handlers::{BotContext, HandlerResult};
use crate::database::models::AutosendSetting;
use crate::error::ServiceError;
use crate::utils::datetime::{format_datetime, RepeatInterval};
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_validation_error;
use crate::utils::validation::parse_time_and_interval;

fn is_off(arg: &str) -> bool {
    matches!(arg.to_lowercase().as_str(), "off" | "выкл" | "нет")
}

/// `/autosend` shows the setting, `/autosend off` disables it and
/// `/autosend <HH:MM> [interval]` sets it; the interval defaults to daily
pub async fn handle_autosend(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    arg: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);
    let arg = arg.trim();

    if arg.is_empty() {
        let text = match ctx.notifications.autosend(user_id).await? {
            Some((setting, fire_at)) => format!(
                "Расписание на завтра приходит в {} ({}). Следующая отправка: {}",
                setting.time.clock_label(),
                setting.interval.label(),
                fire_at
                    .map(|at| format_datetime(&at, ctx.offset))
                    .unwrap_or_else(|| "не запланирована".to_string())
            ),
            None => "Отправка расписания выключена. Включить: /autosend 20:00".to_string(),
        };
        feedback.info(&text).await?;
        return Ok(());
    }

    let setting = if is_off(arg) {
        None
    } else {
        match parse_time_and_interval(arg) {
            Ok((time, interval)) => Some(AutosendSetting {
                time,
                interval: interval.unwrap_or(RepeatInterval::Daily),
            }),
            Err(e) => {
                log_validation_error("/autosend", arg, &e.to_string(), user_id);
                feedback
                    .error(&format!("{}\nПример: /autosend 20:00 daily или /autosend off", e))
                    .await?;
                return Ok(());
            }
        }
    };

    if !ensure_registered(&feedback, user_id, ctx).await? {
        return Ok(());
    }

    match ctx.notifications.set_autosend(user_id, setting).await {
        Ok(Some(fire_at)) => {
            feedback
                .success(&format!(
                    "Расписание на завтра будет приходить. Следующая отправка: {}",
                    format_datetime(&fire_at, ctx.offset)
                ))
                .await?;
        }
        Ok(None) => {
            feedback.success("Отправка расписания выключена").await?;
        }
        Err(ServiceError::NotFound { .. }) => {
            feedback.error("Сначала войдите в дневник: /register <логин> <пароль>").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
