//! # Elschool Bot
//!
//! A Telegram bot that delivers grades and timetables from the elschool
//! electronic diary on a schedule.
//!
//! ## Features
//! - Log in with diary credentials and view grades
//! - Numbered grade notifications: once, daily, weekly or monthly
//! - Tomorrow's timetable sent automatically
//! - Pending sends survive restarts, restored from SQLite

/// Bot command handlers and message processing
pub mod bot;
/// Configuration management and environment variables
pub mod config;
/// Database models, connections, and migrations
pub mod database;
/// Error types shared across layers
pub mod error;
/// Scheduling, delivery and portal access
pub mod services;
/// Utility functions for datetime, validation, and formatting
pub mod utils;
