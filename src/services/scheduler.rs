//! Delay scheduler: one cancellable sleeping task per `(user_id, notification_id)`.
//!
//! A task sleeps until its fire instant and then hands a [`FiredTask`] to the
//! dispatcher over a channel. The dispatcher has to [`DelayScheduler::claim`]
//! the task before delivering and [`DelayScheduler::complete`] it afterwards.
//! Every registration gets a new generation number, so a fire that was
//! cancelled or replaced while it was queued is recognised and dropped.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::database::store::NotificationStore;
use crate::error::SchedulerError;
use crate::utils::datetime::{
    delay_until, next_occurrence, next_occurrence_after, next_occurrence_from, Clock,
    RepeatInterval, TimeSpec,
};
use crate::utils::logging::log_task_event;

/// Registry key of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub user_id: i64,
    pub notification_id: i64,
}

impl TaskKey {
    pub fn new(user_id: i64, notification_id: i64) -> Self {
        Self {
            user_id,
            notification_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.notification_id)
    }
}

/// Sent by a task whose sleep elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTask {
    pub key: TaskKey,
    pub generation: u64,
    pub fire_at: DateTime<Utc>,
}

/// How the dispatcher finishes a claimed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Drop the task for good
    Retire,
    /// Register the next occurrence one interval step after the fired one
    Reschedule {
        time: TimeSpec,
        interval: RepeatInterval,
    },
    /// Try the same task again after a pause
    RetryIn(std::time::Duration),
}

#[derive(Debug)]
enum TaskState {
    Sleeping(AbortHandle),
    Firing,
}

#[derive(Debug)]
struct TaskEntry {
    generation: u64,
    fire_at: DateTime<Utc>,
    state: TaskState,
}

impl TaskEntry {
    fn abort(&self) {
        if let TaskState::Sleeping(handle) = &self.state {
            handle.abort();
        }
    }
}

pub struct DelayScheduler {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
    generations: AtomicU64,
    fired_tx: mpsc::UnboundedSender<FiredTask>,
}

impl DelayScheduler {
    /// Creates the scheduler and the receiving end its tasks fire into
    pub fn new(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> (Self, mpsc::UnboundedReceiver<FiredTask>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            store,
            clock,
            offset,
            tasks: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules the next occurrence of `time`, replacing any task under the
    /// same key. Returns the fire instant.
    pub fn schedule(
        &self,
        user_id: i64,
        notification_id: i64,
        time: Option<TimeSpec>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let time = time.ok_or(SchedulerError::MissingTime {
            user_id,
            notification_id,
        })?;
        let fire_at = next_occurrence(time, self.offset, self.clock.now())
            .ok_or_else(|| unrepresentable(time, RepeatInterval::Once))?;

        self.schedule_at(TaskKey::new(user_id, notification_id), fire_at);
        Ok(fire_at)
    }

    /// Schedules today's occurrence of `time` advanced by one `interval` step
    pub fn reschedule_after_interval(
        &self,
        user_id: i64,
        notification_id: i64,
        time: TimeSpec,
        interval: RepeatInterval,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let fire_at = next_occurrence_after(time, interval, self.offset, self.clock.now())
            .ok_or_else(|| unrepresentable(time, interval))?;

        self.schedule_at(TaskKey::new(user_id, notification_id), fire_at);
        Ok(fire_at)
    }

    /// Schedules a task at its pending instant if that is still ahead,
    /// otherwise at the next occurrence of `time`
    pub fn resume(
        &self,
        user_id: i64,
        notification_id: i64,
        time: TimeSpec,
        pending: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let fire_at = self
            .resume_instant(time, pending, self.clock.now())
            .ok_or_else(|| unrepresentable(time, RepeatInterval::Once))?;

        self.schedule_at(TaskKey::new(user_id, notification_id), fire_at);
        Ok(fire_at)
    }

    fn resume_instant(
        &self,
        time: TimeSpec,
        pending: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match pending.filter(|at| *at > now) {
            Some(at) => Some(at),
            None => next_occurrence(time, self.offset, now),
        }
    }

    /// Cancels the task under the key. Returns false if there was none.
    pub fn cancel(&self, user_id: i64, notification_id: i64) -> bool {
        let key = TaskKey::new(user_id, notification_id);
        match self.tasks().remove(&key) {
            Some(entry) => {
                entry.abort();
                log_task_event("cancelled", key, None);
                true
            }
            None => false,
        }
    }

    /// Cancels every task of the user, autosend included. Returns how many
    /// were registered.
    pub fn cancel_user(&self, user_id: i64) -> usize {
        let mut tasks = self.tasks();
        let keys: Vec<TaskKey> = tasks
            .keys()
            .filter(|key| key.user_id == user_id)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = tasks.remove(key) {
                entry.abort();
                log_task_event("cancelled", *key, Some("user removed"));
            }
        }
        keys.len()
    }

    /// Rebuilds every task from the store, dropping whatever was registered
    /// before. Returns the number of live tasks.
    pub async fn restore_all(&self) -> Result<usize, SchedulerError> {
        let outstanding = self.store.list_for_restore().await?;
        let now = self.clock.now();

        let mut tasks = self.tasks();
        for (_, entry) in tasks.drain() {
            entry.abort();
        }

        for (user_id, entries) in outstanding {
            for entry in entries {
                let key = TaskKey::new(user_id, entry.id);
                match self.resume_instant(entry.time, entry.next_fire_at, now) {
                    Some(at) => {
                        self.register(&mut tasks, key, at);
                    }
                    None => tracing::warn!(
                        "TASK: cannot restore {} at {}: fire time out of range",
                        key,
                        entry.time
                    ),
                }
            }
        }

        let restored = tasks.len();
        tracing::info!("TASK: restored {} task(s)", restored);
        Ok(restored)
    }

    /// Marks a fired task as being dispatched. False when the generation was
    /// cancelled or replaced after it fired.
    pub fn claim(&self, key: TaskKey, generation: u64) -> bool {
        let mut tasks = self.tasks();
        match tasks.get_mut(&key) {
            Some(entry) if entry.generation == generation => {
                entry.state = TaskState::Firing;
                log_task_event("fired", key, None);
                true
            }
            _ => {
                tracing::debug!("TASK: dropping stale fire of {} (generation {})", key, generation);
                false
            }
        }
    }

    /// Whether `generation` is still the registered task for the key
    pub fn is_current(&self, key: TaskKey, generation: u64) -> bool {
        self.tasks()
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Finishes a claimed task. Returns the next fire instant when a new task
    /// was registered, `None` when the task retired or was cancelled while
    /// it was being dispatched.
    pub fn complete(
        &self,
        key: TaskKey,
        generation: u64,
        completion: Completion,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let mut tasks = self.tasks();
        let fired_at = match tasks.get(&key) {
            Some(entry) if entry.generation == generation => entry.fire_at,
            _ => {
                log_task_event("superseded", key, Some("completion ignored"));
                return Ok(None);
            }
        };

        let now = self.clock.now();
        let next = match completion {
            Completion::Retire => {
                tasks.remove(&key);
                log_task_event("retired", key, None);
                return Ok(None);
            }
            Completion::Reschedule { time, interval } => {
                next_occurrence_from(time, interval, self.offset, fired_at, now)
                    .ok_or_else(|| unrepresentable(time, interval))?
            }
            Completion::RetryIn(pause) => Duration::from_std(pause)
                .ok()
                .and_then(|pause| now.checked_add_signed(pause))
                .ok_or_else(|| {
                    SchedulerError::Unrepresentable(format!("retry in {pause:?}"))
                })?,
        };

        self.register(&mut tasks, key, next);
        Ok(Some(next))
    }

    /// Fire instant of the live task under the key
    pub fn fire_time(&self, user_id: i64, notification_id: i64) -> Option<DateTime<Utc>> {
        self.tasks()
            .get(&TaskKey::new(user_id, notification_id))
            .map(|entry| entry.fire_at)
    }

    /// Number of live tasks, including ones being dispatched
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    /// Aborts every sleeping task
    pub fn shutdown(&self) {
        let mut tasks = self.tasks();
        let count = tasks.len();
        for (_, entry) in tasks.drain() {
            entry.abort();
        }
        tracing::info!("TASK: scheduler stopped, {} task(s) aborted", count);
    }

    fn schedule_at(&self, key: TaskKey, fire_at: DateTime<Utc>) {
        let mut tasks = self.tasks();
        self.register(&mut tasks, key, fire_at);
    }

    /// Spawns the sleeping task and registers it, aborting the previous one.
    /// Called with the registry locked so a zero delay cannot be claimed
    /// before the entry exists.
    fn register(
        &self,
        tasks: &mut HashMap<TaskKey, TaskEntry>,
        key: TaskKey,
        fire_at: DateTime<Utc>,
    ) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = delay_until(fire_at, self.clock.now());
        let fired_tx = self.fired_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the process is shutting down
            let _ = fired_tx.send(FiredTask {
                key,
                generation,
                fire_at,
            });
        });

        let entry = TaskEntry {
            generation,
            fire_at,
            state: TaskState::Sleeping(handle.abort_handle()),
        };
        if let Some(previous) = tasks.insert(key, entry) {
            previous.abort();
        }

        let details = format!("at {} in {}s", fire_at.to_rfc3339(), delay.as_secs());
        log_task_event("scheduled", key, Some(&details));
        generation
    }
}

fn unrepresentable(time: TimeSpec, interval: RepeatInterval) -> SchedulerError {
    SchedulerError::Unrepresentable(format!("{} repeating {}", time, interval.label()))
}
