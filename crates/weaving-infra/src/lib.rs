//! Infrastructure layer for Weaving Flow.
//!
//! Contains implementations of the capability traits defined in `weaving-core`:
//! SQLite storage for graphs and runs, a Chrome DevTools browser launcher,
//! log/webhook notifiers, and the `config.toml` loader.

pub mod browser;
pub mod config;
pub mod notify;
pub mod sqlite;
