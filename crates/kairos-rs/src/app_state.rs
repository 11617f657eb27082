//! Concrete process-wide service handles, wired together once at startup and
//! shared across HTTP workers via `actix_web::web::Data`.

use std::sync::Arc;

use crate::config::Config;
use crate::services::correlator::Correlator;
use crate::services::eventbus::EventBusClient;
use crate::services::forwarder::HttpForwarder;
use crate::services::queue::QueueSubmitter;
use crate::services::routing::RoutingResolver;
use crate::services::stores::{S3ObjectStore, S3RoutingStore, SqsQueuePublisher, SsmParameterStore};

pub type AppRoutingResolver = RoutingResolver<S3RoutingStore, SsmParameterStore>;
pub type AppQueueSubmitter = QueueSubmitter<S3ObjectStore, SqsQueuePublisher>;
pub type AppCorrelator = Correlator<S3ObjectStore>;

/// The process-singleton handles the router facade dispatches to, per
/// spec.md §3 "Lifetimes".
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub routing_resolver: Arc<AppRoutingResolver>,
    pub queue_submitter: Arc<AppQueueSubmitter>,
    pub correlator: Arc<AppCorrelator>,
    pub forwarder: Arc<HttpForwarder>,
    pub event_bus: EventBusClient,
}
