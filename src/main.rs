//! # Elschool Bot Main Entry Point
//!
//! Initializes logging, loads configuration, sets up the database,
//! restores pending notifications and runs the Telegram bot next to the
//! health server.

use anyhow::Result;
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elschool_bot::bot::handlers::{BotContext, BotHandler, BotState};
use elschool_bot::config::Config;
use elschool_bot::database::connection::DatabaseManager;
use elschool_bot::database::store::{NotificationStore, SqliteNotificationStore};
use elschool_bot::services::delivery::TelegramSink;
use elschool_bot::services::dispatcher::NotificationDispatcher;
use elschool_bot::services::health::HealthService;
use elschool_bot::services::notifications::NotificationService;
use elschool_bot::services::portal::HttpPortalApi;
use elschool_bot::services::provider::{CachedDataProvider, DataProvider};
use elschool_bot::services::scheduler::DelayScheduler;
use elschool_bot::utils::datetime::SystemClock;
use elschool_bot::utils::logging::log_system_event;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "elschool_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let offset = config.utc_offset()?;

    info!("Starting Elschool Bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Database: {}, HTTP Port: {}, Portal: {}, UTC offset: {}h",
        config.database_url, config.http_port, config.portal_api_url, config.utc_offset_hours
    );

    info!("Initializing database connection...");
    let db = DatabaseManager::new(&config.database_url).await?;
    info!("Running database migrations...");
    db.run_migrations().await?;
    info!("Database initialized successfully");

    let store: Arc<dyn NotificationStore> = Arc::new(SqliteNotificationStore::new(db.clone()));
    let clock = Arc::new(SystemClock);
    let (scheduler, fired) = DelayScheduler::new(store.clone(), clock.clone(), offset);
    let scheduler = Arc::new(scheduler);

    // pending sends come back before any command can touch the scheduler
    let restored = scheduler.restore_all().await?;
    log_system_event("schedules restored", Some(&format!("{} tasks", restored)));

    let bot = Bot::new(&config.telegram_bot_token);

    let portal = Arc::new(HttpPortalApi::new(config.portal_api_url.clone()));
    let provider: Arc<dyn DataProvider> = Arc::new(CachedDataProvider::new(
        db.clone(),
        portal,
        clock,
        config.grades_cache_seconds,
    ));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        scheduler.clone(),
        store.clone(),
        provider.clone(),
        Arc::new(TelegramSink::new(bot.clone())),
    ));
    let dispatch_task = tokio::spawn(dispatcher.run(fired));
    log_system_event("notification dispatcher started", None);

    let handler = BotHandler::new(BotContext {
        db: db.clone(),
        notifications: NotificationService::new(store, scheduler.clone()),
        provider,
        offset,
    });

    let health_service = HealthService::new(db, scheduler.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", config.http_port, e))?;
    info!("Health check server starting on port {}", config.http_port);

    let bot_task = tokio::spawn(async move {
        Dispatcher::builder(bot, handler.schema())
            .dependencies(dptree::deps![InMemStorage::<BotState>::new()])
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    });

    let health_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_service.router).await {
            tracing::error!("Health server error: {}", e);
        }
    });

    tokio::select! {
        result = bot_task => {
            if let Err(e) = result {
                tracing::error!("Bot task error: {}", e);
            }
        }
        result = health_task => {
            if let Err(e) = result {
                tracing::error!("Health task error: {}", e);
            }
        }
    }

    scheduler.shutdown();
    dispatch_task.abort();

    log_system_event("application stopped", None);
    Ok(())
}
