use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use std::env;

use crate::utils::datetime::utc_offset;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/elschool.db";
const DEFAULT_PORTAL_API_URL: &str = "http://127.0.0.1:8081";

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub database_url: String,
    pub http_port: u16,
    /// Base URL of the portal scraping service
    pub portal_api_url: String,
    /// Hours east of UTC in which users enter send times
    pub utc_offset_hours: i32,
    /// Seconds a user's grades stay cached
    pub grades_cache_seconds: i64,
}

/// Value of `key`, or `None` when it is unset or blank
fn non_blank(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token = non_blank("TELEGRAM_BOT_TOKEN").ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?;

        let database_url = non_blank("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let http_port = non_blank("HTTP_PORT")
            .unwrap_or_else(|| "3000".to_string())
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid HTTP_PORT"))?;

        let portal_api_url =
            non_blank("PORTAL_API_URL").unwrap_or_else(|| DEFAULT_PORTAL_API_URL.to_string());

        let utc_offset_hours: i32 = non_blank("UTC_OFFSET_HOURS")
            .unwrap_or_else(|| "5".to_string())
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid UTC_OFFSET_HOURS"))?;
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(anyhow!("Invalid UTC_OFFSET_HOURS"));
        }

        let grades_cache_seconds: i64 = non_blank("GRADES_CACHE_SECONDS")
            .unwrap_or_else(|| "3600".to_string())
            .trim()
            .parse()
            .ok()
            .filter(|seconds: &i64| *seconds >= 0)
            .ok_or_else(|| anyhow!("Invalid GRADES_CACHE_SECONDS"))?;

        Ok(Config {
            telegram_bot_token: token,
            database_url,
            http_port,
            portal_api_url,
            utc_offset_hours,
            grades_cache_seconds,
        })
    }

    /// The configured offset as a chrono offset
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        utc_offset(self.utc_offset_hours).ok_or_else(|| anyhow!("Invalid UTC_OFFSET_HOURS"))
    }
}
