pub mod config;
pub mod domain;
pub mod fleet_engine;

pub use config::*;
pub use domain::*;
pub use fleet_engine::*;
