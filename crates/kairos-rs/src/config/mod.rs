//! Environment-driven configuration loading.

pub mod settings;

pub use settings::{Config, ConfigError, Environment};
