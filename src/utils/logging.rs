use std::fmt::Display;
use tracing::{debug, error, info, warn};

/// Logs command start with consistent format
pub fn log_command_start(command: &str, user: &str, user_id: i64, chat_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!(
            "CMD_START: {} by {}({}) in chat {} - {}",
            command, user, user_id, chat_id, d
        ),
        None => info!("CMD_START: {} by {}({}) in chat {}", command, user, user_id, chat_id),
    }
}

/// Logs command completion with consistent format
pub fn log_command_success(command: &str, user: &str, user_id: i64, chat_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!(
            "CMD_SUCCESS: {} by {}({}) in chat {} - {}",
            command, user, user_id, chat_id, d
        ),
        None => info!("CMD_SUCCESS: {} by {}({}) in chat {}", command, user, user_id, chat_id),
    }
}

pub fn log_command_error(command: &str, user: &str, user_id: i64, chat_id: i64, error: &str) {
    error!(
        "CMD_ERROR: {} by {}({}) in chat {} - {}",
        command, user, user_id, chat_id, error
    );
}

/// Logs rejected command arguments
pub fn log_validation_error(command: &str, value: &str, error: &str, user_id: i64) {
    warn!(
        "VALIDATION_ERROR: {} - '{}' rejected: {} - user {}",
        command, value, error, user_id
    );
}

pub fn log_database_error(operation: &str, table: &str, error: &str, details: Option<&str>) {
    match details {
        Some(d) => error!("DB_ERROR: {} on {} failed: {} - {}", operation, table, error, d),
        None => error!("DB_ERROR: {} on {} failed: {}", operation, table, error),
    }
}

/// Logs lifecycle events of the process
pub fn log_system_event(event: &str, details: Option<&str>) {
    match details {
        Some(d) => info!("SYSTEM: {} - {}", event, d),
        None => info!("SYSTEM: {}", event),
    }
}

/// Logs a scheduler transition of one task (`user/notification`)
pub fn log_task_event(event: &str, task: impl Display, details: Option<&str>) {
    match details {
        Some(d) => debug!("TASK: {} {} - {}", task, event, d),
        None => debug!("TASK: {} {}", task, event),
    }
}

/// Logs a delivery that failed at the Telegram side
pub fn log_delivery_error(user_id: i64, task: impl Display, error: &str) {
    warn!("DELIVERY_ERROR: {} to user {} - {}", task, user_id, error);
}
