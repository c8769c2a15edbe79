//! Shared building blocks for Sunalite: the chat wire types exchanged with
//! model backends, the configuration schema and loader, and small helpers.

pub mod config;
pub mod types;
pub mod utils;
