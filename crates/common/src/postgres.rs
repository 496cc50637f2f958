mod client;
mod config;
mod correlation_repository;
mod history_repository;
mod migrations;
mod rows;
mod status_repository;
mod telemetry_store;

pub use client::*;
pub use config::*;
pub use correlation_repository::PostgresCorrelationRepository;
pub use history_repository::*;
pub use migrations::*;
pub use status_repository::PostgresStatusRepository;
pub use telemetry_store::*;
