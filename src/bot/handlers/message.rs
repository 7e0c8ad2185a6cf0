use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use super::{BotContext, BotDialogue, HandlerResult};
use crate::bot::commands::{account, autosend, notifications, Command};
use crate::utils::logging::{log_command_error, log_command_start, log_command_success};

const WELCOME: &str = "Привет! Я присылаю оценки и расписание из elschool.\n\n\
                       1. Войдите: /register <логин> <пароль>\n\
                       2. Посмотрите оценки: /grades\n\
                       3. Настройте отправку: /notify 18:00 daily\n\n\
                       Все команды: /help";

fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::Help => "/help",
        Command::Start => "/start",
        Command::Register { .. } => "/register",
        Command::Grades => "/grades",
        Command::Schedule(_) => "/schedule",
        Command::Notifications => "/notifications",
        Command::Notify(_) => "/notify",
        Command::Edit(_) => "/edit",
        Command::Delete(_) => "/delete",
        Command::Autosend(_) => "/autosend",
        Command::Cancel => "/cancel",
        Command::Forget(_) => "/forget",
    }
}

pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: BotDialogue,
    ctx: Arc<BotContext>,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let username = user.username.clone().unwrap_or_else(|| user.first_name.clone());
    let chat_id = msg.chat.id.0;
    let name = command_name(&cmd);

    // never log credentials
    log_command_start(name, &username, user_id, chat_id, None);

    // any command but /cancel leaves an open edit
    if cmd != Command::Cancel {
        notifications::abandon_edit(&dialogue, &ctx.notifications).await?;
    }

    let result: HandlerResult = match cmd {
        Command::Help => bot
            .send_message(msg.chat.id, Command::descriptions().to_string())
            .await
            .map(|_| ())
            .map_err(Into::into),
        Command::Start => bot
            .send_message(msg.chat.id, WELCOME)
            .await
            .map(|_| ())
            .map_err(Into::into),
        Command::Register { login, password } => {
            account::handle_register(&bot, &msg, user_id, &login, &password, &ctx).await
        }
        Command::Grades => account::handle_grades(&bot, &msg, user_id, &ctx).await,
        Command::Schedule(arg) => account::handle_schedule(&bot, &msg, user_id, &arg, &ctx).await,
        Command::Notifications => notifications::handle_list(&bot, &msg, user_id, &ctx).await,
        Command::Notify(args) => notifications::handle_notify(&bot, &msg, user_id, &args, &ctx).await,
        Command::Edit(arg) => {
            notifications::handle_edit(&bot, &msg, user_id, &arg, &dialogue, &ctx).await
        }
        Command::Delete(arg) => notifications::handle_delete(&bot, &msg, user_id, &arg, &ctx).await,
        Command::Autosend(arg) => autosend::handle_autosend(&bot, &msg, user_id, &arg, &ctx).await,
        Command::Cancel => notifications::handle_cancel(&bot, &msg, &dialogue, &ctx).await,
        Command::Forget(arg) => account::handle_forget(&bot, &msg, user_id, &arg, &ctx).await,
    };

    match &result {
        Ok(()) => log_command_success(name, &username, user_id, chat_id, None),
        Err(e) => log_command_error(name, &username, user_id, chat_id, &e.to_string()),
    }
    result
}
