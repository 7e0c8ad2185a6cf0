//! Handles fired tasks: fetch fresh data, deliver, then retire or reschedule.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::database::models::{Notification, AUTOSEND_ID};
use crate::database::store::NotificationStore;
use crate::error::SchedulerError;
use crate::services::delivery::MessageSink;
use crate::services::provider::{with_reauthentication, DataProvider};
use crate::services::render::{render_failure, render_grades, timetable_message};
use crate::services::scheduler::{Completion, DelayScheduler, FiredTask, TaskKey};
use crate::utils::datetime::{local_date, RepeatInterval, TimeSpec};
use crate::utils::logging::{log_delivery_error, log_task_event};

/// Pause before a fire whose row could not be read is tried again
pub const STORE_RETRY: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// What happened to one fired task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The fire was cancelled or replaced before it could be claimed
    Stale,
    /// The row was deleted meanwhile; the task is gone without a delivery
    Orphaned,
    /// Delivered once, row and task removed
    Retired,
    /// Delivered, next fire registered
    Rescheduled(DateTime<Utc>),
    /// The row could not be read; the same task fires again later
    Retrying(DateTime<Utc>),
    /// Delivered, but the user cancelled or edited the task meanwhile
    Superseded,
}

pub struct NotificationDispatcher {
    scheduler: Arc<DelayScheduler>,
    store: Arc<dyn NotificationStore>,
    provider: Arc<dyn DataProvider>,
    sink: Arc<dyn MessageSink>,
}

impl NotificationDispatcher {
    pub fn new(
        scheduler: Arc<DelayScheduler>,
        store: Arc<dyn NotificationStore>,
        provider: Arc<dyn DataProvider>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            scheduler,
            store,
            provider,
            sink,
        }
    }

    /// Consumes fires until the scheduler is dropped. Each fire runs in its
    /// own task so a slow portal never holds back other notifications.
    pub async fn run(self: Arc<Self>, mut fired: mpsc::UnboundedReceiver<FiredTask>) {
        while let Some(task) = fired.recv().await {
            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                dispatcher.dispatch(task).await;
            });
        }
        tracing::info!("SYSTEM: notification dispatcher stopped");
    }

    /// Runs one fire to completion. Errors end up in the outcome and the log,
    /// never in the caller.
    pub async fn dispatch(&self, task: FiredTask) -> DispatchOutcome {
        let FiredTask { key, generation, .. } = task;
        if !self.scheduler.claim(key, generation) {
            return DispatchOutcome::Stale;
        }

        let result = if key.notification_id == AUTOSEND_ID {
            self.dispatch_autosend(key, generation).await
        } else {
            self.dispatch_notification(key, generation).await
        };

        match result {
            Ok(outcome) => {
                tracing::debug!("TASK: {} dispatched: {:?}", key, outcome);
                outcome
            }
            Err(e) => {
                tracing::error!("TASK: {} bookkeeping failed: {}", key, e);
                // a task that cannot be rescheduled must not stay registered
                let _ = self.scheduler.complete(key, generation, Completion::Retire);
                DispatchOutcome::Retired
            }
        }
    }

    async fn dispatch_notification(
        &self,
        key: TaskKey,
        generation: u64,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let notification = match self.store.get(key.user_id, key.notification_id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                self.scheduler.complete(key, generation, Completion::Retire)?;
                log_task_event("orphaned", key, Some("row deleted before delivery"));
                return Ok(DispatchOutcome::Orphaned);
            }
            Err(e) => return self.retry_later(key, generation, &e.to_string()),
        };

        let text = self.grades_text(&notification).await;
        self.deliver(key, &text).await;

        let settings = &notification.settings;
        if settings.interval.is_repeating() {
            return self
                .reschedule(key, generation, settings.time, settings.interval)
                .await;
        }

        if !self.scheduler.is_current(key, generation) {
            return Ok(DispatchOutcome::Superseded);
        }
        if let Err(e) = self.store.delete(key.user_id, key.notification_id).await {
            tracing::error!("TASK: {} delivered but its row was not deleted: {}", key, e);
        }
        self.scheduler.complete(key, generation, Completion::Retire)?;
        Ok(DispatchOutcome::Retired)
    }

    async fn dispatch_autosend(
        &self,
        key: TaskKey,
        generation: u64,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let setting = match self.store.get_autosend(key.user_id).await {
            Ok(Some(setting)) => setting,
            Ok(None) => {
                self.scheduler.complete(key, generation, Completion::Retire)?;
                log_task_event("orphaned", key, Some("autosend switched off"));
                return Ok(DispatchOutcome::Orphaned);
            }
            Err(e) => return self.retry_later(key, generation, &e.to_string()),
        };

        let tomorrow = local_date(self.scheduler.now(), self.scheduler.offset()) + Duration::days(1);
        let text = timetable_message(self.provider.as_ref(), key.user_id, tomorrow).await;
        self.deliver(key, &text).await;

        if setting.interval.is_repeating() {
            return self
                .reschedule(key, generation, setting.time, setting.interval)
                .await;
        }

        if !self.scheduler.is_current(key, generation) {
            return Ok(DispatchOutcome::Superseded);
        }
        if let Err(e) = self.store.set_autosend(key.user_id, None).await {
            tracing::error!("TASK: {} delivered but autosend was not switched off: {}", key, e);
        }
        self.scheduler.complete(key, generation, Completion::Retire)?;
        Ok(DispatchOutcome::Retired)
    }

    async fn grades_text(&self, notification: &Notification) -> String {
        let user_id = notification.user_id;
        match with_reauthentication(self.provider.as_ref(), user_id, || self.provider.grades(user_id)).await {
            Ok(grades) => {
                let today = local_date(self.scheduler.now(), self.scheduler.offset());
                render_grades(&notification.settings, &grades, today)
            }
            Err(e) => render_failure(&e),
        }
    }

    async fn deliver(&self, key: TaskKey, text: &str) {
        if let Err(e) = self.sink.send(key.user_id, text).await {
            log_delivery_error(key.user_id, key, &e.to_string());
        }
    }

    async fn reschedule(
        &self,
        key: TaskKey,
        generation: u64,
        time: TimeSpec,
        interval: RepeatInterval,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let Some(next) = self
            .scheduler
            .complete(key, generation, Completion::Reschedule { time, interval })?
        else {
            return Ok(DispatchOutcome::Superseded);
        };

        if let Err(e) = self
            .store
            .set_next_fire_at(key.user_id, key.notification_id, Some(next))
            .await
        {
            tracing::warn!("TASK: {} next fire not persisted: {}", key, e);
        }
        log_task_event("rescheduled", key, Some(&next.to_rfc3339()));
        Ok(DispatchOutcome::Rescheduled(next))
    }

    fn retry_later(
        &self,
        key: TaskKey,
        generation: u64,
        error: &str,
    ) -> Result<DispatchOutcome, SchedulerError> {
        tracing::error!("TASK: {} could not be loaded, retrying later: {}", key, error);
        match self
            .scheduler
            .complete(key, generation, Completion::RetryIn(STORE_RETRY))?
        {
            Some(at) => Ok(DispatchOutcome::Retrying(at)),
            None => Ok(DispatchOutcome::Superseded),
        }
    }
}
