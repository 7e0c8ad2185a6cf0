//! Error types shared across the scheduler, the store and the data provider.

/// Errors raised while parsing send times and repeat intervals from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeSpecError {
    /// The text is not `HH_MM` or `HH:MM`
    #[error("malformed time '{0}', expected HH:MM")]
    Malformed(String),

    /// Hour outside 0..=23
    #[error("hour {0} is out of range 0-23")]
    HourOutOfRange(u32),

    /// Minute outside 0..=59
    #[error("minute {0} is out of range 0-59")]
    MinuteOutOfRange(u32),

    /// Unknown repeat interval name or code
    #[error("unknown repeat interval '{0}'")]
    UnknownInterval(String),
}

/// Notification store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row could not be decoded into domain types
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Delay scheduler failures
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `schedule` was called before a send time was chosen
    #[error("no send time chosen for notification {notification_id} of user {user_id}")]
    MissingTime {
        /// Owner of the notification
        user_id: i64,
        /// Notification id
        notification_id: i64,
    },

    /// The computed fire time cannot be represented
    #[error("fire time cannot be represented: {0}")]
    Unrepresentable(String),

    /// Reading notifications for restore failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Data provider failures
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Session token or credentials are invalid or expired
    #[error("{message}")]
    Registration {
        /// Human readable cause
        message: String,
        /// Login that was tried, if any
        login: Option<String>,
        /// Password that was tried, if any
        password: Option<String>,
    },

    /// Upstream data had an unexpected shape
    #[error("{0}")]
    DataProcess(String),

    /// The user never registered with the bot
    #[error("user {0} is not registered")]
    NotRegistered(i64),

    /// Cache read or write failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProviderError {
    /// Registration error without attempted credentials
    pub fn registration(message: impl Into<String>) -> Self {
        ProviderError::Registration {
            message: message.into(),
            login: None,
            password: None,
        }
    }

    /// Whether a re-authentication attempt can fix this error
    pub fn is_registration(&self) -> bool {
        matches!(self, ProviderError::Registration { .. })
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        ProviderError::Store(StoreError::Database(err))
    }
}

/// Errors surfaced by the notification service to command handlers
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The notification does not exist (anymore)
    #[error("notification {notification_id} of user {user_id} not found")]
    NotFound {
        /// Owner of the notification
        user_id: i64,
        /// Notification id
        notification_id: i64,
    },

    /// Scheduling failed
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Persisting failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
