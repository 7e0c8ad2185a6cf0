//! Notification persistence as seen by the scheduler and the dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::connection::DatabaseManager;
use super::models::{
    AutosendSetting, Notification, NotificationName, NotificationSettings, RestoreEntry, User,
    AUTOSEND_ID,
};
use crate::error::StoreError;
use crate::utils::logging::log_database_error;

/// Read/write access to notification rows and the per-user autosend column
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persists a new notification under the smallest unused id of the user
    async fn create(
        &self,
        user_id: i64,
        settings: NotificationSettings,
    ) -> Result<Notification, StoreError>;

    /// Returns false when the notification does not exist
    async fn update(
        &self,
        user_id: i64,
        id: i64,
        settings: &NotificationSettings,
    ) -> Result<bool, StoreError>;

    /// Returns false when there was nothing to delete
    async fn delete(&self, user_id: i64, id: i64) -> Result<bool, StoreError>;

    async fn get(&self, user_id: i64, id: i64) -> Result<Option<Notification>, StoreError>;

    async fn names(&self, user_id: i64) -> Result<Vec<NotificationName>, StoreError>;

    /// Every outstanding notification per user, autosend entries included as id `-1`
    async fn list_for_restore(&self) -> Result<BTreeMap<i64, Vec<RestoreEntry>>, StoreError>;

    /// Records the pending fire instant; id `-1` targets the autosend column
    async fn set_next_fire_at(
        &self,
        user_id: i64,
        id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn get_autosend(&self, user_id: i64) -> Result<Option<AutosendSetting>, StoreError>;

    /// `None` switches autosend off. Returns false when the user is unknown.
    async fn set_autosend(
        &self,
        user_id: i64,
        setting: Option<AutosendSetting>,
    ) -> Result<bool, StoreError>;

    /// Removes the user row; notifications and cached grades go with it.
    /// Returns false when the user is unknown.
    async fn delete_user(&self, user_id: i64) -> Result<bool, StoreError>;
}

/// `NotificationStore` backed by the bot's SQLite database
#[derive(Clone)]
pub struct SqliteNotificationStore {
    db: DatabaseManager,
}

impl SqliteNotificationStore {
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }
}

fn logged<T>(operation: &str, table: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Err(e) = &result {
        log_database_error(operation, table, &e.to_string(), None);
    }
    result
}

/// A row that fails to decode stays in the table but gets no task
fn skip_unreadable(table: &str, user_id: i64, id: i64, error: &StoreError) {
    let row = format!("{user_id}/{id}");
    log_database_error("DECODE", table, &error.to_string(), Some(&row));
    tracing::warn!("TASK: {} skipped on restore: {}", row, error);
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn create(
        &self,
        user_id: i64,
        settings: NotificationSettings,
    ) -> Result<Notification, StoreError> {
        let result = Notification::create(&self.db.pool, user_id, settings).await;
        if let Ok(notification) = &result {
            tracing::info!(
                "User {} saved notification {} '{}' at {} repeating {}",
                user_id,
                notification.id,
                notification.settings.name,
                notification.settings.time.clock_label(),
                notification.settings.interval.label()
            );
        }
        logged("INSERT", "notifications", result)
    }

    async fn update(
        &self,
        user_id: i64,
        id: i64,
        settings: &NotificationSettings,
    ) -> Result<bool, StoreError> {
        tracing::info!(
            "User {} updated notification {} to {} repeating {}",
            user_id,
            id,
            settings.time.clock_label(),
            settings.interval.label()
        );
        logged(
            "UPDATE",
            "notifications",
            Notification::update(&self.db.pool, user_id, id, settings).await,
        )
    }

    async fn delete(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        tracing::info!("User {} deleted notification {}", user_id, id);
        logged(
            "DELETE",
            "notifications",
            Notification::delete(&self.db.pool, user_id, id).await,
        )
    }

    async fn get(&self, user_id: i64, id: i64) -> Result<Option<Notification>, StoreError> {
        logged(
            "SELECT",
            "notifications",
            Notification::find(&self.db.pool, user_id, id).await,
        )
    }

    async fn names(&self, user_id: i64) -> Result<Vec<NotificationName>, StoreError> {
        logged(
            "SELECT",
            "notifications",
            Notification::names(&self.db.pool, user_id).await,
        )
    }

    async fn list_for_restore(&self) -> Result<BTreeMap<i64, Vec<RestoreEntry>>, StoreError> {
        let mut restore: BTreeMap<i64, Vec<RestoreEntry>> = BTreeMap::new();

        let rows = logged(
            "SELECT",
            "notifications",
            Notification::all_for_restore(&self.db.pool).await,
        )?;
        for (user_id, id, entry) in rows {
            match entry {
                Ok(entry) => restore.entry(user_id).or_default().push(entry),
                Err(e) => skip_unreadable("notifications", user_id, id, &e),
            }
        }

        let users = logged(
            "SELECT",
            "users",
            User::with_autosend(&self.db.pool).await.map_err(StoreError::from),
        )?;
        for user in users {
            let entry = user.autosend().and_then(|setting| {
                setting
                    .map(|setting| -> Result<RestoreEntry, StoreError> {
                        Ok(RestoreEntry {
                            id: AUTOSEND_ID,
                            time: setting.time,
                            next_fire_at: user.autosend_next_fire_at()?,
                        })
                    })
                    .transpose()
            });
            match entry {
                Ok(Some(entry)) => restore.entry(user.id).or_default().push(entry),
                Ok(None) => {}
                Err(e) => skip_unreadable("users", user.id, AUTOSEND_ID, &e),
            }
        }

        Ok(restore)
    }

    async fn set_next_fire_at(
        &self,
        user_id: i64,
        id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if id == AUTOSEND_ID {
            return logged(
                "UPDATE",
                "users",
                User::set_autosend_next_fire_at(&self.db.pool, user_id, next_fire_at)
                    .await
                    .map_err(StoreError::from),
            );
        }
        logged(
            "UPDATE",
            "notifications",
            Notification::set_next_fire_at(&self.db.pool, user_id, id, next_fire_at).await,
        )
    }

    async fn get_autosend(&self, user_id: i64) -> Result<Option<AutosendSetting>, StoreError> {
        match User::find_by_id(&self.db.pool, user_id).await? {
            Some(user) => user.autosend(),
            None => Ok(None),
        }
    }

    async fn set_autosend(
        &self,
        user_id: i64,
        setting: Option<AutosendSetting>,
    ) -> Result<bool, StoreError> {
        match &setting {
            Some(s) => tracing::info!(
                "User {} set timetable autosend at {} repeating {}",
                user_id,
                s.time.clock_label(),
                s.interval.label()
            ),
            None => tracing::info!("User {} switched timetable autosend off", user_id),
        }
        logged(
            "UPDATE",
            "users",
            User::set_autosend(&self.db.pool, user_id, setting.as_ref())
                .await
                .map_err(StoreError::from),
        )
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool, StoreError> {
        tracing::info!("User {} removed all their data", user_id);
        logged(
            "DELETE",
            "users",
            User::delete(&self.db.pool, user_id)
                .await
                .map_err(StoreError::from),
        )
    }
}
