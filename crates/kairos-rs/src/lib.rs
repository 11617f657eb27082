//! # kairos-rs: compile-request router
//!
//! Request-routing front door for a multi-tenant code-compilation service.
//! Clients POST source code and build options to a compile/cmake endpoint
//! identified by a compiler id; the router selects a backend for that
//! compiler, either a durable work queue (with results correlated
//! asynchronously over a shared event bus) or a direct HTTP backend, and
//! synchronously returns the compilation result to the client.
//!
//! ## Module Organization
//!
//! - [`config`]: environment-driven configuration loading
//! - [`models`]: routing, queue, and result data types
//! - [`services`]: routing resolver, queue submitter, event-bus client,
//!   result correlator, and HTTP forwarder
//! - [`routes`]: HTTP route handlers (compile/cmake facade, healthcheck)
//! - [`logs`]: structured logging configuration
//!
//! ## Control Flow
//!
//! HTTP handler → generate correlation id → subscribe on the event bus →
//! resolve routing → branch:
//! - **queue**: submit to the queue, await the result via the correlator,
//!   shape the response;
//! - **url**: unsubscribe, forward directly over HTTP.
//!
//! The event-bus client runs independently of any single request, decoding
//! inbound frames and handing them to the correlator, which wakes the
//! matching waiter.

pub mod app_state;
pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;

pub use app_state::AppState;
