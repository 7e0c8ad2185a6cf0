//! Saving, editing and deleting notifications together with their tasks.
//!
//! Every mutation cancels the live task of the key before the row changes,
//! so an old task never fires with settings the user already replaced.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::database::models::{
    AutosendSetting, Notification, NotificationName, NotificationSettings, AUTOSEND_ID,
};
use crate::database::store::NotificationStore;
use crate::error::ServiceError;
use crate::services::scheduler::DelayScheduler;

/// A notification name with the instant its task fires next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledName {
    pub id: i64,
    pub name: String,
    pub fire_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    scheduler: Arc<DelayScheduler>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, scheduler: Arc<DelayScheduler>) -> Self {
        Self { store, scheduler }
    }

    async fn persist_fire_time(&self, user_id: i64, id: i64, fire_at: DateTime<Utc>) {
        if let Err(e) = self.store.set_next_fire_at(user_id, id, Some(fire_at)).await {
            tracing::warn!("TASK: {}/{} next fire not persisted: {}", user_id, id, e);
        }
    }

    /// Saves a new notification and schedules its first fire
    pub async fn create(
        &self,
        user_id: i64,
        settings: NotificationSettings,
    ) -> Result<Notification, ServiceError> {
        let mut notification = self.store.create(user_id, settings).await?;

        let fire_at = self.scheduler.schedule(
            user_id,
            notification.id,
            Some(notification.settings.time),
        )?;
        self.persist_fire_time(user_id, notification.id, fire_at).await;

        notification.next_fire_at = Some(fire_at);
        Ok(notification)
    }

    /// Stops the live task and returns the row as it was, so an aborted edit
    /// can put it back
    pub async fn begin_edit(&self, user_id: i64, id: i64) -> Result<Notification, ServiceError> {
        let original = self
            .store
            .get(user_id, id)
            .await?
            .ok_or(ServiceError::NotFound {
                user_id,
                notification_id: id,
            })?;

        self.scheduler.cancel(user_id, id);
        Ok(original)
    }

    /// Persists the edited settings and schedules the edited time
    pub async fn commit_edit(
        &self,
        user_id: i64,
        id: i64,
        settings: NotificationSettings,
    ) -> Result<DateTime<Utc>, ServiceError> {
        self.scheduler.cancel(user_id, id);

        if !self.store.update(user_id, id, &settings).await? {
            return Err(ServiceError::NotFound {
                user_id,
                notification_id: id,
            });
        }

        let fire_at = self.scheduler.schedule(user_id, id, Some(settings.time))?;
        self.persist_fire_time(user_id, id, fire_at).await;
        Ok(fire_at)
    }

    /// Re-creates the task of an edit the user abandoned, keeping a pending
    /// weekly or monthly fire where it was
    pub async fn abort_edit(&self, original: &Notification) -> Result<DateTime<Utc>, ServiceError> {
        let Notification { user_id, id, .. } = *original;

        if self.store.get(user_id, id).await?.is_none() {
            return Err(ServiceError::NotFound {
                user_id,
                notification_id: id,
            });
        }

        let fire_at = self.scheduler.resume(
            user_id,
            id,
            original.settings.time,
            original.next_fire_at,
        )?;
        self.persist_fire_time(user_id, id, fire_at).await;
        Ok(fire_at)
    }

    /// Cancels the task, then deletes the row. Returns false when there was
    /// no such notification.
    pub async fn delete(&self, user_id: i64, id: i64) -> Result<bool, ServiceError> {
        self.scheduler.cancel(user_id, id);
        Ok(self.store.delete(user_id, id).await?)
    }

    /// Names of the user's notifications ordered by id
    pub async fn list(&self, user_id: i64) -> Result<Vec<ScheduledName>, ServiceError> {
        let names = self.store.names(user_id).await?;
        Ok(names
            .into_iter()
            .map(|NotificationName { id, name }| ScheduledName {
                id,
                fire_at: self.scheduler.fire_time(user_id, id),
                name,
            })
            .collect())
    }

    /// Switches the timetable autosend on (rescheduling it) or off
    pub async fn set_autosend(
        &self,
        user_id: i64,
        setting: Option<AutosendSetting>,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        self.scheduler.cancel(user_id, AUTOSEND_ID);

        if !self.store.set_autosend(user_id, setting).await? {
            return Err(ServiceError::NotFound {
                user_id,
                notification_id: AUTOSEND_ID,
            });
        }

        let Some(setting) = setting else {
            return Ok(None);
        };
        let fire_at = self
            .scheduler
            .schedule(user_id, AUTOSEND_ID, Some(setting.time))?;
        self.persist_fire_time(user_id, AUTOSEND_ID, fire_at).await;
        Ok(Some(fire_at))
    }

    /// Current autosend setting and its next fire
    pub async fn autosend(
        &self,
        user_id: i64,
    ) -> Result<Option<(AutosendSetting, Option<DateTime<Utc>>)>, ServiceError> {
        let setting = self.store.get_autosend(user_id).await?;
        Ok(setting.map(|s| (s, self.scheduler.fire_time(user_id, AUTOSEND_ID))))
    }

    /// Deletes the user with every notification, cancelling their tasks
    /// first. Returns false when the user was not registered.
    pub async fn remove_user(&self, user_id: i64) -> Result<bool, ServiceError> {
        let cancelled = self.scheduler.cancel_user(user_id);
        let removed = self.store.delete_user(user_id).await?;
        tracing::info!(
            "User {} removed, {} task(s) cancelled",
            user_id,
            cancelled
        );
        Ok(removed)
    }
}
