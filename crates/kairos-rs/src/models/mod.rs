//! Data types shared across the routing, queueing, and correlation services.

pub mod error;
pub mod queue;
pub mod routing;

pub use error::RouterError;
pub use queue::{build_queue_message, OverflowEnvelope};
pub use routing::{RawRoutingEntry, ResolvedRouting};
