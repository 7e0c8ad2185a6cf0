pub mod account;
pub mod autosend;
pub mod notifications;

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команды бота elschool:")]
pub enum Command {
    #[command(description = "показать это сообщение")]
    Help,
    #[command(description = "начать работу")]
    Start,
    #[command(description = "войти в дневник: /register <логин> <пароль>", parse_with = "split")]
    Register { login: String, password: String },
    #[command(description = "показать оценки")]
    Grades,
    #[command(description = "расписание на день: /schedule [ДД.ММ|завтра]")]
    Schedule(String),
    #[command(description = "список отправок оценок")]
    Notifications,
    #[command(
        description = "новая отправка: /notify <ЧЧ:ММ> [once|daily|weekly|monthly] [list|stats] [название]"
    )]
    Notify(String),
    #[command(description = "изменить время отправки: /edit <номер>")]
    Edit(String),
    #[command(description = "удалить отправку: /delete <номер>")]
    Delete(String),
    #[command(description = "расписание на завтра: /autosend <ЧЧ:ММ> [интервал] или /autosend off")]
    Autosend(String),
    #[command(description = "отменить изменение отправки")]
    Cancel,
    #[command(description = "удалить свои данные: /forget login|password|all|full")]
    Forget(String),
}
