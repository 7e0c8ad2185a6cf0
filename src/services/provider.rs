//! Grade and timetable access for a Telegram user.
//!
//! [`PortalApi`] is the raw portal client, [`DataProvider`] is what the bot
//! and the dispatcher use: it knows the user's session, caches grades in
//! SQLite and re-authenticates with stored credentials.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::database::connection::DatabaseManager;
use crate::database::models::{GradeCache, Grades, User};
use crate::error::ProviderError;
use crate::utils::datetime::Clock;

/// Portal session of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSession {
    pub jwtoken: String,
    /// Grades page discovered on an earlier fetch, if still valid
    pub url: Option<String>,
}

/// One lesson of a diary day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub homework: Option<String>,
}

/// The school portal
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Logs in and returns a session token
    async fn register(&self, login: &str, password: &str) -> Result<String, ProviderError>;

    /// Current grades together with the grades page they were read from
    async fn grades(&self, session: &PortalSession) -> Result<(Grades, String), ProviderError>;

    async fn diary(&self, session: &PortalSession, date: NaiveDate) -> Result<Vec<Lesson>, ProviderError>;
}

/// Per-user data access used by commands and notifications
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Logs the user in and stores the session and credentials
    async fn register(&self, user_id: i64, login: &str, password: &str) -> Result<(), ProviderError>;

    async fn grades(&self, user_id: i64) -> Result<Grades, ProviderError>;

    /// Lessons of one day
    async fn schedule(&self, user_id: i64, date: NaiveDate) -> Result<Vec<Lesson>, ProviderError>;

    /// Renews the session using the stored login and password
    async fn reauthenticate(&self, user_id: i64) -> Result<(), ProviderError>;
}

/// Runs `fetch`, and once more after a successful re-authentication when it
/// failed with a registration error. A failed re-authentication reports
/// the original error.
pub async fn with_reauthentication<T, F, Fut>(
    provider: &dyn DataProvider,
    user_id: i64,
    fetch: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match fetch().await {
        Err(e) if e.is_registration() => {
            tracing::info!("User {} session rejected, re-authenticating: {}", user_id, e);
            match provider.reauthenticate(user_id).await {
                Ok(()) => fetch().await,
                Err(reauth) => {
                    tracing::warn!("User {} re-authentication failed: {}", user_id, reauth);
                    Err(e)
                }
            }
        }
        other => other,
    }
}

/// [`DataProvider`] that keeps grades in the `grades` table for
/// `cache_time` seconds per user
pub struct CachedDataProvider {
    db: DatabaseManager,
    api: Arc<dyn PortalApi>,
    clock: Arc<dyn Clock>,
    default_cache_time: i64,
}

impl CachedDataProvider {
    pub fn new(
        db: DatabaseManager,
        api: Arc<dyn PortalApi>,
        clock: Arc<dyn Clock>,
        default_cache_time: i64,
    ) -> Self {
        Self {
            db,
            api,
            clock,
            default_cache_time,
        }
    }

    async fn user(&self, user_id: i64) -> Result<User, ProviderError> {
        User::find_by_id(&self.db.pool, user_id)
            .await?
            .ok_or(ProviderError::NotRegistered(user_id))
    }

    fn cache_is_fresh(&self, user: &User) -> bool {
        user.last_cache > 0 && self.clock.now().timestamp() - user.last_cache <= user.cache_time
    }
}

fn session_of(user: &User) -> PortalSession {
    PortalSession {
        jwtoken: user.jwtoken.clone(),
        url: user.url.clone(),
    }
}

#[async_trait]
impl DataProvider for CachedDataProvider {
    async fn register(&self, user_id: i64, login: &str, password: &str) -> Result<(), ProviderError> {
        let jwtoken = match self.api.register(login, password).await {
            Ok(token) => token,
            Err(ProviderError::Registration { message, .. }) => {
                return Err(ProviderError::Registration {
                    message,
                    login: Some(login.to_string()),
                    password: Some(password.to_string()),
                })
            }
            Err(e) => return Err(e),
        };

        let cache_time = match User::find_by_id(&self.db.pool, user_id).await? {
            Some(existing) => existing.cache_time,
            None => self.default_cache_time,
        };
        User::upsert(
            &self.db.pool,
            user_id,
            &jwtoken,
            Some(login),
            Some(password),
            cache_time,
        )
        .await?;
        GradeCache::replace_for_user(&self.db.pool, user_id, &Grades::new()).await?;

        tracing::info!("User {} registered with the portal", user_id);
        Ok(())
    }

    async fn grades(&self, user_id: i64) -> Result<Grades, ProviderError> {
        let user = self.user(user_id).await?;

        if self.cache_is_fresh(&user) {
            tracing::debug!("Serving cached grades for user {}", user_id);
            return Ok(GradeCache::find_by_user(&self.db.pool, user_id).await?);
        }

        let (grades, url) = self.api.grades(&session_of(&user)).await?;
        GradeCache::replace_for_user(&self.db.pool, user_id, &grades).await?;
        User::mark_cached(&self.db.pool, user_id, self.clock.now().timestamp(), &url).await?;

        tracing::debug!(
            "Refreshed grades for user {}: {} lesson(s)",
            user_id,
            grades.len()
        );
        Ok(grades)
    }

    async fn schedule(&self, user_id: i64, date: NaiveDate) -> Result<Vec<Lesson>, ProviderError> {
        let user = self.user(user_id).await?;
        self.api.diary(&session_of(&user), date).await
    }

    async fn reauthenticate(&self, user_id: i64) -> Result<(), ProviderError> {
        let user = self.user(user_id).await?;
        let (Some(login), Some(password)) = (user.login.as_deref(), user.password.as_deref()) else {
            return Err(ProviderError::registration(
                "нет сохранённых логина и пароля, войдите заново через /register",
            ));
        };

        let jwtoken = self.api.register(login, password).await?;
        User::update_token(&self.db.pool, user_id, &jwtoken).await?;

        tracing::info!("User {} re-authenticated with stored credentials", user_id);
        Ok(())
    }
}
