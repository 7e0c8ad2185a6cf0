use elschool_bot::config::Config;
use std::env;
use std::sync::Mutex;

// Config tests share process environment and must not interleave
static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

const VARS: [&str; 6] = [
    "TELEGRAM_BOT_TOKEN",
    "DATABASE_URL",
    "HTTP_PORT",
    "PORTAL_API_URL",
    "UTC_OFFSET_HOURS",
    "GRADES_CACHE_SECONDS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_config_from_env_with_all_vars() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "test_token_123");
    env::set_var("DATABASE_URL", "sqlite:test.db");
    env::set_var("HTTP_PORT", "8080");
    env::set_var("PORTAL_API_URL", "http://portal:9000");
    env::set_var("UTC_OFFSET_HOURS", "3");
    env::set_var("GRADES_CACHE_SECONDS", "600");

    let config = Config::from_env().unwrap();

    assert_eq!(config.telegram_bot_token, "test_token_123");
    assert_eq!(config.database_url, "sqlite:test.db");
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.portal_api_url, "http://portal:9000");
    assert_eq!(config.utc_offset_hours, 3);
    assert_eq!(config.grades_cache_seconds, 600);
    assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 3 * 3600);

    clear_env();
}

#[test]
fn test_config_from_env_with_defaults() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "required_token");

    let config = Config::from_env().unwrap();

    assert_eq!(config.telegram_bot_token, "required_token");
    assert_eq!(config.database_url, "sqlite:./data/elschool.db");
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.portal_api_url, "http://127.0.0.1:8081");
    assert_eq!(config.utc_offset_hours, 5);
    assert_eq!(config.grades_cache_seconds, 3600);
    assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 5 * 3600);

    clear_env();
}

#[test]
fn test_config_missing_required_token() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    let result = Config::from_env();
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("TELEGRAM_BOT_TOKEN must be set"));
}

#[test]
fn test_config_invalid_port() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "test_token");
    env::set_var("HTTP_PORT", "invalid_port");

    let error_msg = Config::from_env().unwrap_err().to_string();
    assert!(error_msg.contains("Invalid HTTP_PORT"));

    env::set_var("HTTP_PORT", "-1");
    assert!(Config::from_env().is_err());

    env::set_var("HTTP_PORT", "65535");
    assert_eq!(Config::from_env().unwrap().http_port, 65535);

    clear_env();
}

#[test]
fn test_config_utc_offset_range() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();
    env::set_var("TELEGRAM_BOT_TOKEN", "test_token");

    for valid in ["-12", "0", "14"] {
        env::set_var("UTC_OFFSET_HOURS", valid);
        assert!(Config::from_env().is_ok(), "offset {valid} should be accepted");
    }

    for invalid in ["15", "-13", "five", "5.5"] {
        env::set_var("UTC_OFFSET_HOURS", invalid);
        let error_msg = Config::from_env().unwrap_err().to_string();
        assert!(error_msg.contains("Invalid UTC_OFFSET_HOURS"));
    }

    clear_env();
}

#[test]
fn test_config_cache_seconds() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();
    env::set_var("TELEGRAM_BOT_TOKEN", "test_token");

    env::set_var("GRADES_CACHE_SECONDS", "0");
    assert_eq!(Config::from_env().unwrap().grades_cache_seconds, 0);

    env::set_var("GRADES_CACHE_SECONDS", "-5");
    let error_msg = Config::from_env().unwrap_err().to_string();
    assert!(error_msg.contains("Invalid GRADES_CACHE_SECONDS"));

    clear_env();
}

#[test]
fn test_config_empty_values() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "   ");
    assert!(Config::from_env().is_err());

    env::set_var("TELEGRAM_BOT_TOKEN", "valid_token");
    env::set_var("DATABASE_URL", "");
    env::set_var("PORTAL_API_URL", "");
    let config = Config::from_env().unwrap();
    assert_eq!(config.database_url, "sqlite:./data/elschool.db");
    assert_eq!(config.portal_api_url, "http://127.0.0.1:8081");

    clear_env();
}

#[test]
fn test_config_whitespace_handling() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "  token_with_spaces  ");
    env::set_var("HTTP_PORT", "  3000  ");
    env::set_var("UTC_OFFSET_HOURS", " 7 ");

    let config = Config::from_env().unwrap();

    assert_eq!(config.telegram_bot_token, "  token_with_spaces  ");
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.utc_offset_hours, 7);

    clear_env();
}
