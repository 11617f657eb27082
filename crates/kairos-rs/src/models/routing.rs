//! Routing table entries and the resolved routing decision for a compiler id.

use serde::{Deserialize, Serialize};

/// Raw shape of a routing entry as persisted in the external key-value store,
/// keyed by `{environment}#{compilerId}` with a legacy fallback of the bare
/// `compilerId`.
///
/// `routing_type` defaults to `"queue"` when absent, per spec.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawRoutingEntry {
    #[serde(default)]
    pub routing_type: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Routing decision returned by the resolver: either direct HTTP forwarding
/// or a resolved, color-qualified queue URL.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRouting {
    Url {
        target_url: String,
        environment: String,
    },
    Queue {
        queue_url: String,
        environment: String,
    },
}
