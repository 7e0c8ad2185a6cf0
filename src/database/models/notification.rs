use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::utils::datetime::{RepeatInterval, TimeSpec};

/// Reserved id of the per-user "send tomorrow's timetable" notification.
/// It lives in the `users` row, not in `notifications`.
pub const AUTOSEND_ID: i64 = -1;

/// Marks accepted by a freshly created notification
pub const DEFAULT_MARKS: [i64; 4] = [2, 3, 4, 5];

/// How the grades of a notification are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayMode {
    /// Every mark of every lesson
    #[default]
    List,
    /// Averages and per-mark counts
    Statistics,
}

impl DisplayMode {
    pub fn code(self) -> i64 {
        match self {
            DisplayMode::List => 0,
            DisplayMode::Statistics => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DisplayMode::List),
            1 => Some(DisplayMode::Statistics),
            _ => None,
        }
    }
}

/// Which marks to keep, relative to the local date at fire time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateWindow {
    Day,
    Week,
    Month,
}

impl DateWindow {
    pub fn code(self) -> i64 {
        match self {
            DateWindow::Day => 0,
            DateWindow::Week => 1,
            DateWindow::Month => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DateWindow::Day),
            1 => Some(DateWindow::Week),
            2 => Some(DateWindow::Month),
            _ => None,
        }
    }
}

/// Lessons included in a notification
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LessonSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl LessonSelection {
    fn to_column(&self) -> String {
        match self {
            LessonSelection::All => "all".to_string(),
            LessonSelection::Only(lessons) => lessons.join(","),
        }
    }

    fn from_column(value: &str) -> Self {
        if value == "all" {
            return LessonSelection::All;
        }
        LessonSelection::Only(
            value
                .split(',')
                .map(str::trim)
                .filter(|lesson| !lesson.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn includes(&self, lesson: &str) -> bool {
        match self {
            LessonSelection::All => true,
            LessonSelection::Only(lessons) => lessons.iter().any(|l| l == lesson),
        }
    }
}

/// Stored filters applied to fresh grades before rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeFilters {
    pub lessons: LessonSelection,
    pub dates: Option<DateWindow>,
    pub marks: BTreeSet<i64>,
    pub show_without_marks: bool,
}

impl Default for GradeFilters {
    fn default() -> Self {
        Self {
            lessons: LessonSelection::All,
            dates: None,
            marks: DEFAULT_MARKS.into_iter().collect(),
            show_without_marks: false,
        }
    }
}

/// Everything a user configures for one notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Display name, defaulted by the store when empty
    pub name: String,
    pub time: TimeSpec,
    pub interval: RepeatInterval,
    pub display_mode: DisplayMode,
    pub filters: GradeFilters,
}

impl NotificationSettings {
    /// Settings with default filters and an empty name
    pub fn new(time: TimeSpec, interval: RepeatInterval) -> Self {
        Self {
            name: String::new(),
            time,
            interval,
            display_mode: DisplayMode::default(),
            filters: GradeFilters::default(),
        }
    }
}

/// A persisted grade notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub id: i64,
    pub settings: NotificationSettings,
    /// Pending fire instant, kept so weekly and monthly repeats survive restarts
    pub next_fire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationName {
    pub id: i64,
    pub name: String,
}

/// What the scheduler needs to rebuild one task after a restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreEntry {
    pub id: i64,
    pub time: TimeSpec,
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// The per-user timetable autosend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosendSetting {
    pub time: TimeSpec,
    pub interval: RepeatInterval,
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    user_id: i64,
    id: i64,
    name: String,
    next_time: String,
    interval: i64,
    show_mode: i64,
    lessons: String,
    dates: Option<i64>,
    marks: String,
    show_without_marks: bool,
    next_fire_at: Option<String>,
}

const NOTIFICATION_COLUMNS: &str = "user_id, id, name, next_time, interval, show_mode, lessons, \
                                    dates, marks, show_without_marks, next_fire_at";

pub(crate) fn parse_time(value: &str) -> Result<TimeSpec, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("next_time '{value}': {e}")))
}

pub(crate) fn parse_interval(code: i64) -> Result<RepeatInterval, StoreError> {
    RepeatInterval::from_code(code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown interval code {code}")))
}

pub(crate) fn parse_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt(format!("next_fire_at '{v}': {e}")))
        })
        .transpose()
}

fn parse_marks(value: &str) -> Result<BTreeSet<i64>, StoreError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|mark| !mark.is_empty())
        .map(|mark| {
            mark.parse::<i64>()
                .map_err(|_| StoreError::Corrupt(format!("mark '{mark}'")))
        })
        .collect()
}

fn marks_column(marks: &BTreeSet<i64>) -> String {
    marks
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let display_mode = DisplayMode::from_code(row.show_mode)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown show_mode {}", row.show_mode)))?;
        let dates = row
            .dates
            .map(|code| {
                DateWindow::from_code(code)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown dates code {code}")))
            })
            .transpose()?;

        Ok(Notification {
            user_id: row.user_id,
            id: row.id,
            settings: NotificationSettings {
                name: row.name,
                time: parse_time(&row.next_time)?,
                interval: parse_interval(row.interval)?,
                display_mode,
                filters: GradeFilters {
                    lessons: LessonSelection::from_column(&row.lessons),
                    dates,
                    marks: parse_marks(&row.marks)?,
                    show_without_marks: row.show_without_marks,
                },
            },
            next_fire_at: parse_instant(row.next_fire_at.as_deref())?,
        })
    }
}

/// Smallest positive id not present in `taken`
pub fn smallest_unused_id(taken: &BTreeSet<i64>) -> i64 {
    (1..)
        .find(|id| !taken.contains(id))
        .unwrap_or(1)
}

impl Notification {
    /// Inserts a notification under the smallest unused id for the user
    pub async fn create(
        pool: &sqlx::SqlitePool,
        user_id: i64,
        mut settings: NotificationSettings,
    ) -> Result<Self, StoreError> {
        let mut tx = pool.begin().await?;

        let taken: BTreeSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM notifications WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&mut tx)
                .await?
                .into_iter()
                .collect();
        let id = smallest_unused_id(&taken);

        if settings.name.trim().is_empty() {
            settings.name = format!("отправка {id}");
        }

        sqlx::query(
            "INSERT INTO notifications (user_id, id, name, next_time, interval, show_mode, lessons, \
             dates, marks, show_without_marks, next_fire_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(user_id)
        .bind(id)
        .bind(&settings.name)
        .bind(settings.time.to_string())
        .bind(settings.interval.code())
        .bind(settings.display_mode.code())
        .bind(settings.filters.lessons.to_column())
        .bind(settings.filters.dates.map(DateWindow::code))
        .bind(marks_column(&settings.filters.marks))
        .bind(settings.filters.show_without_marks)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(Notification {
            user_id,
            id,
            settings,
            next_fire_at: None,
        })
    }

    /// Overwrites the settings of an existing notification and clears its
    /// pending fire instant. Returns false when the row does not exist.
    pub async fn update(
        pool: &sqlx::SqlitePool,
        user_id: i64,
        id: i64,
        settings: &NotificationSettings,
    ) -> Result<bool, StoreError> {
        let name = if settings.name.trim().is_empty() {
            format!("отправка {id}")
        } else {
            settings.name.clone()
        };

        let result = sqlx::query(
            "UPDATE notifications SET name = ?, next_time = ?, interval = ?, show_mode = ?, lessons = ?, \
             dates = ?, marks = ?, show_without_marks = ?, next_fire_at = NULL WHERE user_id = ? AND id = ?",
        )
        .bind(name)
        .bind(settings.time.to_string())
        .bind(settings.interval.code())
        .bind(settings.display_mode.code())
        .bind(settings.filters.lessons.to_column())
        .bind(settings.filters.dates.map(DateWindow::code))
        .bind(marks_column(&settings.filters.marks))
        .bind(settings.filters.show_without_marks)
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &sqlx::SqlitePool, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(
        pool: &sqlx::SqlitePool,
        user_id: i64,
        id: i64,
    ) -> Result<Option<Self>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = ? AND id = ?"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(user_id)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    pub async fn names(
        pool: &sqlx::SqlitePool,
        user_id: i64,
    ) -> Result<Vec<NotificationName>, StoreError> {
        Ok(sqlx::query_as::<_, NotificationName>(
            "SELECT id, name FROM notifications WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?)
    }

    /// Every notification row as `(user_id, id, entry)`, ordered by user then id.
    /// Rows are decoded one by one so a single bad row does not hide the rest.
    pub async fn all_for_restore(
        pool: &sqlx::SqlitePool,
    ) -> Result<Vec<(i64, i64, Result<RestoreEntry, StoreError>)>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, i64, String, Option<String>)>(
            "SELECT user_id, id, next_time, next_fire_at FROM notifications ORDER BY user_id, id",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, id, next_time, next_fire_at)| {
                let entry = parse_time(&next_time).and_then(|time| {
                    Ok(RestoreEntry {
                        id,
                        time,
                        next_fire_at: parse_instant(next_fire_at.as_deref())?,
                    })
                });
                (user_id, id, entry)
            })
            .collect())
    }

    pub async fn set_next_fire_at(
        pool: &sqlx::SqlitePool,
        user_id: i64,
        id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET next_fire_at = ? WHERE user_id = ? AND id = ?")
            .bind(next_fire_at.map(|at| at.to_rfc3339()))
            .bind(user_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
