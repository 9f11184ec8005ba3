//! Database module for Pingboard.
//!
//! Provides SQLite storage for targets, pings and status page branding,
//! with embedded migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
