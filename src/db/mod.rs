//! High-level engine API.
//!
//! [`Engine`] ties the row store, commit graph, branch directory and table
//! store together behind session-scoped operations.

mod api;
mod config;

pub use api::{Engine, EngineStats};
pub use config::{ConfigError, EngineConfig};
