use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::notification::{parse_instant, parse_interval, parse_time, AutosendSetting};
use crate::error::StoreError;

/// A user registered with the portal
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub jwtoken: String,
    /// Grades page URL discovered on the first fetch
    pub url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    /// Unix seconds of the last grade refresh, 0 when the cache is invalid
    pub last_cache: i64,
    /// Seconds a grade refresh stays valid
    pub cache_time: i64,
    pub autosend_schedule_time: Option<String>,
    pub autosend_schedule_interval: i64,
    pub autosend_next_fire_at: Option<String>,
}

const USER_COLUMNS: &str = "id, jwtoken, url, login, password, last_cache, cache_time, \
                            autosend_schedule_time, autosend_schedule_interval, autosend_next_fire_at";

impl User {
    /// Registers a user or replaces the session of an existing one.
    /// Replacing invalidates the cached URL and grades.
    pub async fn upsert(
        pool: &sqlx::SqlitePool,
        id: i64,
        jwtoken: &str,
        login: Option<&str>,
        password: Option<&str>,
        cache_time: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, jwtoken, login, password, cache_time) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET jwtoken = excluded.jwtoken, login = excluded.login, \
             password = excluded.password, url = NULL, last_cache = 0",
        )
        .bind(id)
        .bind(jwtoken)
        .bind(login)
        .bind(password)
        .bind(cache_time)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &sqlx::SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Stores a fresh token, dropping the URL and invalidating the cache
    pub async fn update_token(
        pool: &sqlx::SqlitePool,
        id: i64,
        jwtoken: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET jwtoken = ?, url = NULL, last_cache = 0 WHERE id = ?")
            .bind(jwtoken)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Drops the stored login and/or password. The session token stays, so
    /// grades keep coming until the portal expires it.
    pub async fn forget_credentials(
        pool: &sqlx::SqlitePool,
        id: i64,
        login: bool,
        password: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET login = CASE WHEN ? THEN NULL ELSE login END, \
             password = CASE WHEN ? THEN NULL ELSE password END WHERE id = ?",
        )
        .bind(login)
        .bind(password)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &sqlx::SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_cached(
        pool: &sqlx::SqlitePool,
        id: i64,
        at: i64,
        url: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_cache = ?, url = ? WHERE id = ?")
            .bind(at)
            .bind(url)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Decoded autosend configuration, `None` when autosend is off
    pub fn autosend(&self) -> Result<Option<AutosendSetting>, StoreError> {
        self.autosend_schedule_time
            .as_deref()
            .map(|time| {
                Ok(AutosendSetting {
                    time: parse_time(time)?,
                    interval: parse_interval(self.autosend_schedule_interval)?,
                })
            })
            .transpose()
    }

    pub fn autosend_next_fire_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        parse_instant(self.autosend_next_fire_at.as_deref())
    }

    /// Turns autosend on or off. Returns false when the user is unknown.
    pub async fn set_autosend(
        pool: &sqlx::SqlitePool,
        id: i64,
        setting: Option<&AutosendSetting>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET autosend_schedule_time = ?, autosend_schedule_interval = ?, \
             autosend_next_fire_at = NULL WHERE id = ?",
        )
        .bind(setting.map(|s| s.time.to_string()))
        .bind(setting.map_or(-1, |s| s.interval.code()))
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_autosend_next_fire_at(
        pool: &sqlx::SqlitePool,
        id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET autosend_next_fire_at = ? WHERE id = ?")
            .bind(next_fire_at.map(|at| at.to_rfc3339()))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Users whose timetable autosend is switched on
    pub async fn with_autosend(pool: &sqlx::SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE autosend_schedule_time IS NOT NULL ORDER BY id"
        );
        sqlx::query_as::<_, User>(&query).fetch_all(pool).await
    }
}
