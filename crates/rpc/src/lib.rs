//! FinePay RPC - composition root and CLI
//!
//! `AppContext` builds the store, engines and scheduler once; `api` holds the
//! tenant-scoped operations an HTTP layer would expose; `commands` renders
//! them for the `finepay` binary.

pub mod api;
pub mod commands;
pub mod config;
pub mod context;

pub use config::{AppConfig, ConfigError};
pub use context::AppContext;
