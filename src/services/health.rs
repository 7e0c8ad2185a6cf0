use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::database::connection::DatabaseManager;
use crate::services::scheduler::DelayScheduler;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub database: DatabaseHealth,
    pub scheduler: SchedulerHealth,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: String,
    pub connection_pool_size: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerHealth {
    /// Sleeping plus currently dispatched tasks
    pub live_tasks: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseManager,
    pub scheduler: Arc<DelayScheduler>,
    pub start_time: DateTime<Utc>,
}

pub struct HealthService {
    pub router: Router,
}

impl HealthService {
    pub fn new(db: DatabaseManager, scheduler: Arc<DelayScheduler>) -> Self {
        let state = AppState {
            db,
            scheduler,
            start_time: Utc::now(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/health/ready", get(readiness_check))
            .route("/health/live", get(liveness_check))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state);

        Self { router }
    }
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    let start = std::time::Instant::now();
    let healthy = ping(&state.db).await.is_ok();
    let response_time_ms = start.elapsed().as_millis() as u64;

    if !healthy {
        tracing::warn!("Health check failed: database unreachable");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            status: "healthy".to_string(),
            connection_pool_size: state.db.pool.size(),
            response_time_ms,
        },
        scheduler: SchedulerHealth {
            live_tasks: state.scheduler.len(),
        },
        uptime_seconds: uptime,
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<&'static str>, StatusCode> {
    match ping(&state.db).await {
        Ok(()) => Ok(Json("ready")),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn liveness_check() -> Json<&'static str> {
    Json("alive")
}

async fn ping(db: &DatabaseManager) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(&db.pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::SqliteNotificationStore;
    use crate::utils::datetime::{utc_offset, SystemClock, TimeSpec};
    use axum_test::TestServer;
    use tempfile::TempDir;

    async fn create_test_health_service() -> (HealthService, Arc<DelayScheduler>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_url = format!("sqlite://{}", temp_dir.path().join("test.db").display());

        let db = DatabaseManager::new(&db_url)
            .await
            .expect("Failed to create test database");
        db.run_migrations().await.expect("Failed to run migrations");

        let (scheduler, _fired) = DelayScheduler::new(
            Arc::new(SqliteNotificationStore::new(db.clone())),
            Arc::new(SystemClock),
            utc_offset(5).unwrap(),
        );
        let scheduler = Arc::new(scheduler);

        (HealthService::new(db, scheduler.clone()), scheduler, temp_dir)
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_live_tasks() {
        let (health_service, scheduler, _temp_dir) = create_test_health_service().await;
        scheduler
            .schedule(10, 1, Some(TimeSpec::new(12, 0).unwrap()))
            .unwrap();
        scheduler
            .schedule(11, -1, Some(TimeSpec::new(7, 30).unwrap()))
            .unwrap();

        let server = TestServer::new(health_service.router).expect("Failed to create test server");
        let response = server.get("/health").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let health: HealthResponse = response.json();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.database.status, "healthy");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(health.scheduler.live_tasks, 2);
    }

    #[tokio::test]
    async fn test_readiness_endpoint() {
        let (health_service, _scheduler, _temp_dir) = create_test_health_service().await;
        let server = TestServer::new(health_service.router).expect("Failed to create test server");

        let response = server.get("/health/ready").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let ready: String = response.json();
        assert_eq!(ready, "ready");
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let (health_service, _scheduler, _temp_dir) = create_test_health_service().await;
        let server = TestServer::new(health_service.router).expect("Failed to create test server");

        let response = server.get("/health/live").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let alive: String = response.json();
        assert_eq!(alive, "alive");
    }
}
