//! Local-first storage and sync for fitness data.
//!
//! - [`db`]: SQLite storage engine with a single-writer queue, schema registry,
//!   migrations, the action log and the sync run audit trail.
//! - [`sync`]: push/pull against the remote backend and the push scheduler.
//! - [`models`]: typed domain records.
//! - [`FitStore`]: wires everything together from a [`Config`].

pub mod config;
pub mod db;
pub mod models;
mod store;
pub mod sync;
pub mod telemetry;

pub use config::{Config, ConfigError, ConfigSource, ConfigValue};
pub use store::{FitStore, StoreError};
