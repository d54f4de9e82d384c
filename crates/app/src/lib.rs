//! Demo application for the account system.
//!
//! Loads [`config::Config`] from the environment, installs logging and the
//! Prometheus recorder, starts a [`system::BankSystem`] on the in-memory or
//! PostgreSQL event store and runs the [`demo`] script against it.

pub mod config;
pub mod demo;
pub mod error;
pub mod system;
pub mod telemetry;

pub use config::{Config, ConfigError, LogFormat};
pub use demo::DemoOutcome;
pub use error::AppError;
pub use system::BankSystem;
