//! HTTP client of the portal scraping service.
//!
//! The service does the HTML work and answers in JSON:
//! `POST /auth`, `POST /grades` and `POST /diary`.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::database::models::Grades;
use crate::error::ProviderError;
use crate::services::provider::{Lesson, PortalApi, PortalSession};

/// [`PortalApi`] over the scraping service at `base_url`
pub struct HttpPortalApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    jwtoken: String,
}

#[derive(Serialize)]
struct GradesRequest<'a> {
    jwtoken: &'a str,
    url: Option<&'a str>,
}

#[derive(Deserialize)]
struct GradesResponse {
    url: String,
    grades: Grades,
}

#[derive(Serialize)]
struct DiaryRequest<'a> {
    jwtoken: &'a str,
    url: Option<&'a str>,
    /// `dd.mm.yyyy`
    date: String,
}

#[derive(Deserialize)]
struct DiaryResponse {
    lessons: Vec<Lesson>,
}

impl HttpPortalApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::DataProcess(format!("портал недоступен: {e}")))?;

        if let Some(err) = status_error(response.status()) {
            tracing::warn!("Portal {} answered {}", path, response.status());
            return Err(err);
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::DataProcess(format!("неожиданный ответ портала: {e}")))
    }
}

/// Maps a non-success status of the scraping service to a provider error
fn status_error(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::registration("неверный логин или пароль, либо сессия истекла")
        }
        other => ProviderError::registration(format!(
            "проблемы с сервером, http код {}",
            other.as_u16()
        )),
    })
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn register(&self, login: &str, password: &str) -> Result<String, ProviderError> {
        let response: AuthResponse = self.post("/auth", &AuthRequest { login, password }).await?;
        Ok(response.jwtoken)
    }

    async fn grades(&self, session: &PortalSession) -> Result<(Grades, String), ProviderError> {
        let request = GradesRequest {
            jwtoken: &session.jwtoken,
            url: session.url.as_deref(),
        };
        let response: GradesResponse = self.post("/grades", &request).await?;
        Ok((response.grades, response.url))
    }

    async fn diary(&self, session: &PortalSession, date: NaiveDate) -> Result<Vec<Lesson>, ProviderError> {
        let request = DiaryRequest {
            jwtoken: &session.jwtoken,
            url: session.url.as_deref(),
            date: date.format("%d.%m.%Y").to_string(),
        };
        let response: DiaryResponse = self.post("/diary", &request).await?;
        Ok(response.lessons)
    }
}
