//! HTTP route handlers: the compile/cmake facade and the health endpoint.

pub mod compile;
pub mod health;

pub use compile::configure_compile;
pub use health::configure_health;
