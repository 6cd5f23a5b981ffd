//! Configuration Module
//!
//! Handles configuration loading, validation, and conversion into a proxy chain.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
