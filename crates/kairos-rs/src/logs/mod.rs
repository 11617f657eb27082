//! Structured logging configuration.

pub mod logger;

pub use logger::{configure_logger, strip_ansi, visible_len};
