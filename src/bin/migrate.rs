use anyhow::{anyhow, Result};
use elschool_bot::config::Config;
use elschool_bot::database::connection::DatabaseManager;
use std::env;
use std::io;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("migrate");

    match command {
        "migrate" | "up" => run_migrations().await,
        "check" => check_database().await,
        "reset" => reset_database().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_help();
            std::process::exit(1);
        }
    }
}

/// Only the database settings matter here, so a missing bot token is tolerated
fn database_url() -> String {
    dotenvy::dotenv().ok();
    match Config::from_env() {
        Ok(config) => config.database_url,
        Err(_) => env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./data/elschool.db".to_string()),
    }
}

fn sqlite_path(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

async fn run_migrations() -> Result<()> {
    println!("Elschool Bot - Database Migration Tool");
    println!("======================================");

    let url = database_url();
    println!("Database URL: {}", mask_url(&url));

    if url.starts_with("sqlite:") {
        if let Some(parent) = Path::new(sqlite_path(&url)).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                println!("Creating directory: {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    println!("Running database migrations...");
    let db = DatabaseManager::new(&url)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

    match db.run_migrations().await {
        Ok(()) => println!("Migrations completed successfully"),
        Err(e) => {
            eprintln!("Migration failed: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn check_database() -> Result<()> {
    println!("Checking database connection and schema...");

    let url = database_url();
    println!("Database URL: {}", mask_url(&url));

    let db = DatabaseManager::new(&url)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

    match check_tables(&db).await {
        Ok(tables) => {
            println!("Database connection successful");
            println!("Found tables:");
            for table in &tables {
                println!("  - {table}");
            }
            for required in ["users", "grades", "notifications"] {
                if !tables.iter().any(|t| t == required) {
                    println!("Missing table '{required}', run 'migrate up'");
                }
            }
            if tables.iter().any(|t| t == "notifications") {
                let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
                    .fetch_one(&db.pool)
                    .await?;
                println!("Stored notifications: {pending}");
            }
        }
        Err(e) => {
            println!("Database check failed: {e}");
            println!("Try running 'migrate up' to create the schema");
        }
    }
    Ok(())
}

async fn reset_database() -> Result<()> {
    println!("WARNING: This will delete ALL users, cached grades and notifications!");
    println!("Are you sure you want to continue? (yes/no)");

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    if input.trim().to_lowercase() != "yes" {
        println!("Reset cancelled.");
        return Ok(());
    }

    let url = database_url();
    if !url.starts_with("sqlite:") {
        return Err(anyhow!("Reset is only supported for SQLite databases"));
    }
    let path = sqlite_path(&url);
    if Path::new(path).exists() {
        std::fs::remove_file(path)?;
        println!("Deleted database file: {path}");
    }

    println!("Recreating database schema...");
    run_migrations().await?;
    println!("Database reset completed");
    Ok(())
}

async fn check_tables(db: &DatabaseManager) -> Result<Vec<String>> {
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&db.pool)
            .await?;
    Ok(tables)
}

fn mask_url(url: &str) -> String {
    if url.starts_with("sqlite:") {
        match Path::new(sqlite_path(url)).file_name() {
            Some(filename) => format!("sqlite:.../{}", filename.to_string_lossy()),
            None => url.to_string(),
        }
    } else {
        url.to_string()
    }
}

fn print_help() {
    println!("Elschool Bot - Database Migration Tool");
    println!();
    println!("USAGE:");
    println!("    migrate [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    migrate, up    Run database migrations (default)");
    println!("    check          Check database connection and schema");
    println!("    reset          Reset database (SQLite only) - DESTRUCTIVE!");
    println!("    help           Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    DATABASE_URL   Database connection string (default: sqlite:./data/elschool.db)");
    println!();
}
