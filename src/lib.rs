pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod money;
pub mod outbox;
pub mod rate_limit;
pub mod services;

pub use config::Config;
pub use errors::{Result, WalletEngineError};
