use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, NaiveDate};

use crate::database::models::DisplayMode;
use crate::utils::datetime::{RepeatInterval, TimeSpec};

/// Parsed arguments of `/notify <HH:MM> [interval] [list|stats] [name]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyArgs {
    pub time: TimeSpec,
    pub interval: RepeatInterval,
    pub display_mode: DisplayMode,
    pub name: String,
}

const MAX_NAME_LEN: usize = 64;

fn parse_time(token: Option<&str>) -> Result<TimeSpec> {
    let token = token.ok_or_else(|| anyhow!("Укажите время в формате ЧЧ:ММ"))?;
    token
        .parse()
        .map_err(|e| anyhow!("Неверное время '{}': {}", token, e))
}

fn parse_display_mode(token: &str) -> Option<DisplayMode> {
    match token.to_lowercase().as_str() {
        "list" | "список" => Some(DisplayMode::List),
        "stats" | "статистика" => Some(DisplayMode::Statistics),
        _ => None,
    }
}

pub fn validate_notification_name(name: &str) -> Result<()> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(anyhow!("Название не может быть длиннее {} символов", MAX_NAME_LEN));
    }
    if name.contains('\n') || name.contains('\r') {
        return Err(anyhow!("Название не может содержать переносы строк"));
    }
    Ok(())
}

pub fn parse_notify_args(text: &str) -> Result<NotifyArgs> {
    let mut tokens = text.split_whitespace().peekable();
    let time = parse_time(tokens.next())?;

    let interval = match tokens.peek().and_then(|t| t.parse::<RepeatInterval>().ok()) {
        Some(interval) => {
            tokens.next();
            interval
        }
        None => RepeatInterval::Once,
    };

    let display_mode = match tokens.peek().and_then(|t| parse_display_mode(t)) {
        Some(mode) => {
            tokens.next();
            mode
        }
        None => DisplayMode::List,
    };

    let name = tokens.collect::<Vec<_>>().join(" ");
    validate_notification_name(&name)?;

    Ok(NotifyArgs {
        time,
        interval,
        display_mode,
        name,
    })
}

/// Parses `<HH:MM> [interval]`; the interval is `None` when omitted
pub fn parse_time_and_interval(text: &str) -> Result<(TimeSpec, Option<RepeatInterval>)> {
    let mut tokens = text.split_whitespace();
    let time = parse_time(tokens.next())?;

    let interval = tokens
        .next()
        .map(|token| {
            token
                .parse::<RepeatInterval>()
                .map_err(|_| anyhow!("Неизвестный интервал '{}': once, daily, weekly или monthly", token))
        })
        .transpose()?;

    if let Some(extra) = tokens.next() {
        return Err(anyhow!("Лишний аргумент '{}'", extra));
    }
    Ok((time, interval))
}

/// Id of a numbered notification, always positive
pub fn parse_notification_id(text: &str) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("Укажите номер отправки"));
    }
    match text.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(anyhow!("Номер отправки должен быть положительным числом")),
    }
}

pub fn validate_credentials(login: &str, password: &str) -> Result<()> {
    if login.trim().is_empty() || password.trim().is_empty() {
        return Err(anyhow!("Укажите логин и пароль: /register <логин> <пароль>"));
    }
    if login.len() > 100 || password.len() > 100 {
        return Err(anyhow!("Логин или пароль слишком длинные"));
    }
    Ok(())
}

/// What `/forget` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetScope {
    Login,
    Password,
    /// Login and password; the session keeps working until it expires
    Credentials,
    /// The whole account with notifications and cached grades
    Account,
}

pub fn parse_forget_scope(text: &str) -> Result<ForgetScope> {
    match text.trim().to_lowercase().as_str() {
        "login" | "логин" => Ok(ForgetScope::Login),
        "password" | "пароль" => Ok(ForgetScope::Password),
        "all" | "всё" | "все" => Ok(ForgetScope::Credentials),
        "full" | "полностью" => Ok(ForgetScope::Account),
        "" => Err(anyhow!("Укажите, что удалить: login, password, all или full")),
        other => Err(anyhow!(
            "Неизвестный вариант '{}': login, password, all или full",
            other
        )),
    }
}

/// Day for `/schedule`: empty or `сегодня` is today, `завтра` the next day,
/// otherwise `ДД.ММ` (this year) or `ДД.ММ.ГГГГ`
pub fn parse_schedule_date(text: &str, today: NaiveDate) -> Result<NaiveDate> {
    let text = text.trim();
    match text.to_lowercase().as_str() {
        "" | "сегодня" | "today" => return Ok(today),
        "завтра" | "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    let full = if text.matches('.').count() == 1 {
        format!("{}.{}", text, today.year())
    } else {
        text.to_string()
    };
    NaiveDate::parse_from_str(&full, "%d.%m.%Y")
        .map_err(|_| anyhow!("Неверная дата '{}': ДД.ММ или ДД.ММ.ГГГГ", text))
}
