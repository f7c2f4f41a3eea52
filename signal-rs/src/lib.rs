//! signal-rs: Trading signal relay with per-plan daily quotas
//!
//! One sender publishes trading signals; receivers poll for the signals of
//! the senders they follow. Opening signals (`buy`, `sell`) are charged
//! against a daily quota that resets at UTC midnight, and each signal is
//! recorded once per receiver so re-polling never bills twice.
//!
//! # Example
//!
//! ```no_run
//! use signal_rs::api::ApiServer;
//! use signal_rs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pool = signal_rs::db::connect(&config.storage.database_url).await?;
//!     signal_rs::db::init_schema(&pool).await?;
//!
//!     ApiServer::new(pool, config).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`api`]: HTTP endpoints
//! - [`config`]: Configuration management
//! - [`db`]: Pool setup and schema bootstrap
//! - [`delivery`]: Deduplicated, quota-gated delivery
//! - [`identity`]: Receivers, tokens and follows
//! - [`quota`]: Daily quota ledger
//! - [`signals`]: Signal publishing and candidates
//! - [`trades`], [`ea`]: Client-side bookkeeping

pub mod api;
pub mod config;
pub mod db;
pub mod delivery;
pub mod ea;
pub mod error;
pub mod identity;
pub mod quota;
pub mod security;
pub mod signals;
pub mod trades;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SignalError};
