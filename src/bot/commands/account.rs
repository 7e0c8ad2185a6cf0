use teloxide::prelude::*;

use crate::bot::handlers::{BotContext, HandlerResult};
use crate::database::models::{GradeFilters, User};
use crate::services::provider::with_reauthentication;
use crate::services::render::{apply_filters, render_failure, render_list, timetable_message};
use crate::utils::datetime::local_date;
use crate::utils::feedback::{CommandFeedback, FeedbackType};
use crate::utils::logging::log_validation_error;
use crate::utils::validation::{
    parse_forget_scope, parse_schedule_date, validate_credentials, ForgetScope,
};

const NOTHING_STORED: &str = "Данных о вас нет. Войти: /register <логин> <пароль>";

pub async fn handle_register(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    login: &str,
    password: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    // the message carries the password
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        tracing::debug!("Could not delete /register message of user {}: {}", user_id, e);
    }

    if let Err(e) = validate_credentials(login, password) {
        log_validation_error("/register", "<credentials>", &e.to_string(), user_id);
        feedback.error(&e.to_string()).await?;
        return Ok(());
    }

    let progress = feedback.processing("Вхожу в электронный дневник...").await?;
    match ctx.provider.register(user_id, login, password).await {
        Ok(()) => {
            feedback
                .update(
                    progress.id,
                    FeedbackType::Success,
                    "Вход выполнен. Оценки: /grades, отправки: /notify",
                )
                .await?;
        }
        Err(e) => {
            feedback
                .update(progress.id, FeedbackType::Error, &render_failure(&e))
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_grades(bot: &Bot, msg: &Message, user_id: i64, ctx: &BotContext) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);
    let progress = feedback.processing("Получаю оценки...").await?;

    let provider = ctx.provider.as_ref();
    match with_reauthentication(provider, user_id, || provider.grades(user_id)).await {
        Ok(grades) => {
            let filters = GradeFilters {
                show_without_marks: true,
                ..GradeFilters::default()
            };
            let today = local_date(chrono::Utc::now(), ctx.offset);
            let shown = apply_filters(&grades, &filters, today);
            let text = if shown.is_empty() {
                "Оценок пока нет".to_string()
            } else {
                format!("Оценки:\n{}", render_list(&shown))
            };
            feedback.update(progress.id, FeedbackType::Info, &text).await?;
        }
        Err(e) => {
            feedback
                .update(progress.id, FeedbackType::Error, &render_failure(&e))
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_schedule(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    arg: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let today = local_date(chrono::Utc::now(), ctx.offset);
    let date = match parse_schedule_date(arg, today) {
        Ok(date) => date,
        Err(e) => {
            log_validation_error("/schedule", arg, &e.to_string(), user_id);
            feedback.error(&e.to_string()).await?;
            return Ok(());
        }
    };

    let progress = feedback.processing("Получаю расписание...").await?;
    let text = timetable_message(ctx.provider.as_ref(), user_id, date).await;
    feedback.update(progress.id, FeedbackType::Info, &text).await?;
    Ok(())
}

pub async fn handle_forget(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    arg: &str,
    ctx: &BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let scope = match parse_forget_scope(arg) {
        Ok(scope) => scope,
        Err(e) => {
            log_validation_error("/forget", arg, &e.to_string(), user_id);
            feedback.error(&e.to_string()).await?;
            return Ok(());
        }
    };

    let (login, password, what) = match scope {
        ForgetScope::Account => {
            if ctx.notifications.remove_user(user_id).await? {
                feedback
                    .success("Все ваши данные удалены, отправки остановлены. Вернуться: /register <логин> <пароль>")
                    .await?;
            } else {
                feedback.error(NOTHING_STORED).await?;
            }
            return Ok(());
        }
        ForgetScope::Login => (true, false, "логин"),
        ForgetScope::Password => (false, true, "пароль"),
        ForgetScope::Credentials => (true, true, "логин и пароль"),
    };

    if User::forget_credentials(&ctx.db.pool, user_id, login, password).await? {
        feedback
            .success(&format!(
                "Удалил {}. Оценки будут приходить, пока дневник не попросит войти заново, тогда понадобится /register",
                what
            ))
            .await?;
    } else {
        feedback.error(NOTHING_STORED).await?;
    }
    Ok(())
}
