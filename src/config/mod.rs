//! Configuration
//!
//! config.json loading, the language registry and shared types.

pub mod config;
pub mod presets;
pub mod types;
