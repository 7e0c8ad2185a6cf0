#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use tokio::sync::Notify;

use elschool_bot::database::connection::DatabaseManager;
use elschool_bot::database::models::{
    smallest_unused_id, AutosendSetting, Grades, Mark, Notification, NotificationName,
    NotificationSettings, RestoreEntry, AUTOSEND_ID,
};
use elschool_bot::database::store::NotificationStore;
use elschool_bot::error::{ProviderError, StoreError};
use elschool_bot::services::delivery::MessageSink;
use elschool_bot::services::provider::{DataProvider, Lesson};
use elschool_bot::utils::datetime::{utc_offset, Clock, RepeatInterval, TimeSpec};

pub fn offset() -> FixedOffset {
    utc_offset(5).unwrap()
}

/// UTC instant of a wall-clock time in UTC+5
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    offset()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn time(h: u32, m: u32) -> TimeSpec {
    TimeSpec::new(h, m).unwrap()
}

pub fn settings(h: u32, m: u32, interval: RepeatInterval) -> NotificationSettings {
    NotificationSettings::new(time(h, m), interval)
}

pub fn sample_grades() -> Grades {
    let mut grades = Grades::new();
    grades.insert(
        "Алгебра".to_string(),
        vec![
            Mark {
                lesson_date: "10.03.2024".to_string(),
                date: "10.03.2024".to_string(),
                mark: 5,
            },
            Mark {
                lesson_date: "11.03.2024".to_string(),
                date: "11.03.2024".to_string(),
                mark: 4,
            },
        ],
    );
    grades
}

pub async fn setup_test_db() -> Result<(DatabaseManager, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let db = DatabaseManager::new(&database_url).await?;
    db.run_migrations().await?;

    Ok((db, temp_dir))
}

/// A clock the test moves by hand
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct MemoryState {
    users: BTreeSet<i64>,
    notifications: BTreeMap<(i64, i64), Notification>,
    autosend: BTreeMap<i64, (AutosendSetting, Option<DateTime<Utc>>)>,
}

/// In-memory notification store with switchable read failures
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing_reads: AtomicBool,
    /// Calls of `set_next_fire_at`
    pub fire_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, user_id: i64) {
        self.state.lock().unwrap().users.insert(user_id);
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub fn remove_row(&self, user_id: i64, id: i64) {
        self.state.lock().unwrap().notifications.remove(&(user_id, id));
    }

    pub fn row(&self, user_id: i64, id: i64) -> Option<Notification> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .get(&(user_id, id))
            .cloned()
    }

    pub fn autosend_fire_at(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap()
            .autosend
            .get(&user_id)
            .and_then(|(_, at)| *at)
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(
        &self,
        user_id: i64,
        mut settings: NotificationSettings,
    ) -> Result<Notification, StoreError> {
        let mut state = self.state.lock().unwrap();
        let taken: BTreeSet<i64> = state
            .notifications
            .keys()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, id)| *id)
            .collect();
        let id = smallest_unused_id(&taken);
        if settings.name.trim().is_empty() {
            settings.name = format!("отправка {id}");
        }
        let notification = Notification {
            user_id,
            id,
            settings,
            next_fire_at: None,
        };
        state
            .notifications
            .insert((user_id, id), notification.clone());
        Ok(notification)
    }

    async fn update(
        &self,
        user_id: i64,
        id: i64,
        settings: &NotificationSettings,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.notifications.get_mut(&(user_id, id)) {
            Some(row) => {
                row.settings = settings.clone();
                row.next_fire_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .remove(&(user_id, id))
            .is_some())
    }

    async fn get(&self, user_id: i64, id: i64) -> Result<Option<Notification>, StoreError> {
        self.check_reads()?;
        Ok(self.row(user_id, id))
    }

    async fn names(&self, user_id: i64) -> Result<Vec<NotificationName>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .map(|n| NotificationName {
                id: n.id,
                name: n.settings.name.clone(),
            })
            .collect())
    }

    async fn list_for_restore(&self) -> Result<BTreeMap<i64, Vec<RestoreEntry>>, StoreError> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut restore: BTreeMap<i64, Vec<RestoreEntry>> = BTreeMap::new();
        for n in state.notifications.values() {
            restore.entry(n.user_id).or_default().push(RestoreEntry {
                id: n.id,
                time: n.settings.time,
                next_fire_at: n.next_fire_at,
            });
        }
        for (user_id, (setting, next_fire_at)) in &state.autosend {
            restore.entry(*user_id).or_default().push(RestoreEntry {
                id: AUTOSEND_ID,
                time: setting.time,
                next_fire_at: *next_fire_at,
            });
        }
        Ok(restore)
    }

    async fn set_next_fire_at(
        &self,
        user_id: i64,
        id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.fire_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if id == AUTOSEND_ID {
            if let Some(entry) = state.autosend.get_mut(&user_id) {
                entry.1 = next_fire_at;
            }
        } else if let Some(row) = state.notifications.get_mut(&(user_id, id)) {
            row.next_fire_at = next_fire_at;
        }
        Ok(())
    }

    async fn get_autosend(&self, user_id: i64) -> Result<Option<AutosendSetting>, StoreError> {
        self.check_reads()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .autosend
            .get(&user_id)
            .map(|(setting, _)| *setting))
    }

    async fn set_autosend(
        &self,
        user_id: i64,
        setting: Option<AutosendSetting>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.users.contains(&user_id) {
            return Ok(false);
        }
        match setting {
            Some(setting) => {
                state.autosend.insert(user_id, (setting, None));
            }
            None => {
                state.autosend.remove(&user_id);
            }
        }
        Ok(true)
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.notifications.retain(|(user, _), _| *user != user_id);
        state.autosend.remove(&user_id);
        Ok(state.users.remove(&user_id))
    }
}

/// Collects every message instead of sending it
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(i64, String)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("chat {user_id} blocked the bot");
        }
        self.sent.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }
}

/// Holds a fetch until the test releases it
#[derive(Clone, Default)]
pub struct Gate {
    /// Notified when a fetch reaches the gate
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Data provider serving canned grades and lessons. Queued failures are
/// returned by the next fetches, before any canned data.
#[derive(Default)]
pub struct FakeProvider {
    grades: Mutex<Grades>,
    grades_gate: Mutex<Option<Gate>>,
    lessons: Mutex<Vec<Lesson>>,
    failures: Mutex<VecDeque<ProviderError>>,
    reauth_fails: AtomicBool,
    pub fetches: AtomicUsize,
    pub reauths: AtomicUsize,
    pub schedule_dates: Mutex<Vec<NaiveDate>>,
}

impl FakeProvider {
    pub fn with_grades(grades: Grades) -> Arc<Self> {
        let provider = Self::default();
        *provider.grades.lock().unwrap() = grades;
        Arc::new(provider)
    }

    pub fn set_lessons(&self, lessons: Vec<Lesson>) {
        *self.lessons.lock().unwrap() = lessons;
    }

    pub fn fail_next(&self, error: ProviderError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Makes every following `grades` call wait at the returned gate
    pub fn hold_grades(&self) -> Gate {
        let gate = Gate::default();
        *self.grades_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_reauthentication(&self) {
        self.reauth_fails.store(true, Ordering::SeqCst);
    }

    fn next_failure(&self) -> Option<ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl DataProvider for FakeProvider {
    async fn register(&self, _user_id: i64, _login: &str, _password: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn grades(&self, _user_id: i64) -> Result<Grades, ProviderError> {
        let gate = self.grades_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match self.next_failure() {
            Some(e) => Err(e),
            None => Ok(self.grades.lock().unwrap().clone()),
        }
    }

    async fn schedule(&self, _user_id: i64, date: NaiveDate) -> Result<Vec<Lesson>, ProviderError> {
        self.schedule_dates.lock().unwrap().push(date);
        match self.next_failure() {
            Some(e) => Err(e),
            None => Ok(self.lessons.lock().unwrap().clone()),
        }
    }

    async fn reauthenticate(&self, _user_id: i64) -> Result<(), ProviderError> {
        self.reauths.fetch_add(1, Ordering::SeqCst);
        if self.reauth_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::registration("wrong password"));
        }
        Ok(())
    }
}
