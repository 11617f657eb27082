//! Service layer: routing resolution, queue submission, the event-bus
//! transport, result correlation, and direct HTTP forwarding.

pub mod correlator;
pub mod eventbus;
pub mod forwarder;
pub mod queue;
pub mod response_shape;
pub mod routing;
pub mod stores;

pub use correlator::Correlator;
pub use eventbus::{EventBusClient, EventBusSettings};
pub use forwarder::HttpForwarder;
pub use queue::QueueSubmitter;
pub use routing::RoutingResolver;
