//! Routing resolver: per-compiler routing lookup, active-color resolution,
//! and queue URL derivation, per spec.md §4.2.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::Config;
use crate::models::routing::{RawRoutingEntry, ResolvedRouting};
use crate::services::stores::RoutingStore;

/// TTL for the memoised active-color lookup (spec.md §3).
const ACTIVE_COLOR_TTL: Duration = Duration::from_secs(30);

/// Default active color used whenever the parameter store can't be reached.
const DEFAULT_COLOR: &str = "blue";

struct ActiveColorCache {
    value: String,
    fetched_at: Instant,
}

/// Process-singleton routing resolver. Owns the no-TTL routing cache and the
/// 30s-TTL active-color cache; both are behind a `Mutex` held only across the
/// fast, non-I/O region that reads or updates them.
pub struct RoutingResolver<S: RoutingStore, P: crate::services::stores::ParameterStore> {
    routing_store: S,
    parameter_store: P,
    config: Config,
    routing_cache: Mutex<HashMap<String, ResolvedRouting>>,
    active_color_cache: Mutex<Option<ActiveColorCache>>,
}

impl<S: RoutingStore, P: crate::services::stores::ParameterStore> RoutingResolver<S, P> {
    pub fn new(routing_store: S, parameter_store: P, config: Config) -> Self {
        Self {
            routing_store,
            parameter_store,
            config,
            routing_cache: Mutex::new(HashMap::new()),
            active_color_cache: Mutex::new(None),
        }
    }

    /// `lookupCompilerRouting` per spec.md §4.2.
    pub async fn lookup_compiler_routing(&self, compiler_id: &str) -> ResolvedRouting {
        let composite_key = format!("{}#{}", self.config.environment.as_str(), compiler_id);

        if let Some(cached) = self.routing_cache.lock().unwrap().get(&composite_key) {
            return cached.clone();
        }

        let resolved = self.resolve_uncached(compiler_id, &composite_key).await;

        self.routing_cache
            .lock()
            .unwrap()
            .insert(composite_key, resolved.clone());

        resolved
    }

    async fn resolve_uncached(&self, compiler_id: &str, composite_key: &str) -> ResolvedRouting {
        let entry = match self.routing_store.get(composite_key).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => match self.routing_store.get(compiler_id).await {
                Ok(found) => found,
                Err(err) => {
                    warn!("legacy routing lookup for {compiler_id} failed: {err}");
                    None
                }
            },
            Err(err) => {
                warn!("routing lookup for {composite_key} failed: {err}");
                None
            }
        };

        match entry {
            Some(RawRoutingEntry {
                routing_type: Some(ref kind),
                target_url: Some(ref target_url),
                environment,
                ..
            }) if kind == "url" && !target_url.is_empty() => ResolvedRouting::Url {
                target_url: target_url.clone(),
                environment: environment.unwrap_or_else(|| self.config.environment.as_str().to_string()),
            },
            Some(RawRoutingEntry {
                queue_name,
                environment,
                ..
            }) => {
                let environment = environment.unwrap_or_else(|| self.config.environment.as_str().to_string());
                let queue_url = self.resolve_queue_url(queue_name.as_deref()).await;
                ResolvedRouting::Queue {
                    queue_url,
                    environment,
                }
            }
            None => {
                debug!("no routing entry for {compiler_id}, falling back to default colored queue");
                let queue_url = self.resolve_queue_url(None).await;
                ResolvedRouting::Queue {
                    queue_url,
                    environment: "unknown".to_string(),
                }
            }
        }
    }

    /// Builds the queue URL for a routing entry's `queueName`, or the default
    /// colored queue when none is given, per spec.md §3.
    async fn resolve_queue_url(&self, queue_name: Option<&str>) -> String {
        let is_blue = self.active_color().await == "blue";

        match queue_name {
            Some(name) if !name.is_empty() => qualify_queue_url(name, is_blue),
            _ => {
                let base = self
                    .config
                    .default_queue_url(is_blue)
                    .unwrap_or("https://sqs.us-east-1.amazonaws.com/000000000000/compilation-queue");
                qualify_queue_url(base, is_blue)
            }
        }
    }

    /// Resolves the active color, memoised for [`ACTIVE_COLOR_TTL`]. Failures
    /// default to `"blue"` and are never cached.
    async fn active_color(&self) -> String {
        if let Some(cached) = self.active_color_cache.lock().unwrap().as_ref() {
            if cached.fetched_at.elapsed() < ACTIVE_COLOR_TTL {
                return cached.value.clone();
            }
        }

        let path = format!(
            "/compiler-explorer/{}/active-color",
            self.config.environment.as_str()
        );

        match self.parameter_store.get_parameter(&path).await {
            Ok(value) => {
                let value = if value == "blue" || value == "green" {
                    value
                } else {
                    warn!("active-color parameter had unexpected value {value:?}, defaulting to blue");
                    DEFAULT_COLOR.to_string()
                };
                *self.active_color_cache.lock().unwrap() = Some(ActiveColorCache {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                value
            }
            Err(err) => {
                warn!("active-color lookup failed, defaulting to blue: {err}");
                DEFAULT_COLOR.to_string()
            }
        }
    }

    /// Clears both caches. Exposed only for tests, per spec.md §3 ("cleared
    /// only by administrative reset").
    #[cfg(test)]
    pub fn reset_caches(&self) {
        self.routing_cache.lock().unwrap().clear();
        *self.active_color_cache.lock().unwrap() = None;
    }
}

/// Ensures a queue URL's trailing segment carries the color suffix and a
/// `.fifo` suffix, per spec.md §3.
fn qualify_queue_url(base: &str, is_blue: bool) -> String {
    let color = if is_blue { "blue" } else { "green" };

    let (without_fifo, had_fifo) = match base.strip_suffix(".fifo") {
        Some(stripped) => (stripped, true),
        None => (base, false),
    };

    let has_color_suffix = without_fifo.ends_with("-blue") || without_fifo.ends_with("-green");

    let with_color = if has_color_suffix {
        without_fifo.to_string()
    } else {
        format!("{without_fifo}-{color}")
    };

    if had_fifo || !with_color.ends_with(".fifo") {
        format!("{with_color}.fifo")
    } else {
        with_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::services::stores::fakes::{FakeParameterStore, FakeRoutingStore};
    use std::time::Duration as StdDuration;

    fn test_config() -> Config {
        Config {
            environment: Environment::parse_for_test("prod"),
            router_host: "0.0.0.0".to_string(),
            router_port: 10240,
            websocket_url: "wss://events.godbolt.org/prod".to_string(),
            request_timeout: StdDuration::from_secs(60),
            sqs_max_message_size: 262_144,
            s3_overflow_bucket: "temp-storage.godbolt.org".to_string(),
            s3_overflow_prefix: "sqs-overflow/".to_string(),
            compilation_results_bucket: "storage.godbolt.org".to_string(),
            compilation_results_prefix: "cache/".to_string(),
            aws_region: "us-east-1".to_string(),
            routing_table_name: "CompilerRouting".to_string(),
            queue_url_blue: Some("https://sqs.example/prod-compilation-queue-blue.fifo".to_string()),
            queue_url_green: Some("https://sqs.example/prod-compilation-queue-green.fifo".to_string()),
        }
    }

    #[test]
    fn qualify_queue_url_appends_color_and_fifo() {
        assert_eq!(
            qualify_queue_url("https://sqs.example/prod-compilation-queue", true),
            "https://sqs.example/prod-compilation-queue-blue.fifo"
        );
        assert_eq!(
            qualify_queue_url("https://sqs.example/prod-compilation-queue-green", true),
            "https://sqs.example/prod-compilation-queue-green.fifo"
        );
        assert_eq!(
            qualify_queue_url("https://sqs.example/prod-compilation-queue-green.fifo", false),
            "https://sqs.example/prod-compilation-queue-green.fifo"
        );
    }

    #[tokio::test]
    async fn url_routing_entry_is_returned_verbatim() {
        let store = FakeRoutingStore::default();
        store.entries.lock().unwrap().insert(
            "prod#gcc12".to_string(),
            RawRoutingEntry {
                routing_type: Some("url".to_string()),
                target_url: Some("https://backend.example".to_string()),
                queue_name: None,
                environment: Some("prod".to_string()),
            },
        );
        let resolver = RoutingResolver::new(store, FakeParameterStore::fixed("blue"), test_config());

        let routing = resolver.lookup_compiler_routing("gcc12").await;
        assert_eq!(
            routing,
            ResolvedRouting::Url {
                target_url: "https://backend.example".to_string(),
                environment: "prod".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_entry_falls_back_to_default_colored_queue() {
        let resolver = RoutingResolver::new(
            FakeRoutingStore::default(),
            FakeParameterStore::fixed("green"),
            test_config(),
        );

        let routing = resolver.lookup_compiler_routing("unknown-compiler").await;
        match routing {
            ResolvedRouting::Queue { queue_url, environment } => {
                assert_eq!(environment, "unknown");
                assert_eq!(queue_url, "https://sqs.example/prod-compilation-queue-green.fifo");
            }
            other => panic!("expected queue routing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parameter_store_failure_defaults_to_blue() {
        let resolver = RoutingResolver::new(
            FakeRoutingStore::default(),
            FakeParameterStore::failing(),
            test_config(),
        );

        let routing = resolver.lookup_compiler_routing("unknown-compiler").await;
        match routing {
            ResolvedRouting::Queue { queue_url, .. } => {
                assert!(queue_url.contains("-blue.fifo"));
            }
            other => panic!("expected queue routing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn legacy_bare_compiler_id_key_is_used_as_fallback() {
        let store = FakeRoutingStore::default();
        store.entries.lock().unwrap().insert(
            "gcc12".to_string(),
            RawRoutingEntry {
                routing_type: Some("queue".to_string()),
                target_url: None,
                queue_name: Some("prod-custom-queue".to_string()),
                environment: Some("prod".to_string()),
            },
        );
        let resolver = RoutingResolver::new(store, FakeParameterStore::fixed("blue"), test_config());

        let routing = resolver.lookup_compiler_routing("gcc12").await;
        match routing {
            ResolvedRouting::Queue { queue_url, .. } => {
                assert_eq!(queue_url, "https://sqs.example/prod-custom-queue-blue.fifo");
            }
            other => panic!("expected queue routing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_is_cached_across_calls() {
        let store = FakeRoutingStore::default();
        store.entries.lock().unwrap().insert(
            "prod#gcc12".to_string(),
            RawRoutingEntry {
                routing_type: Some("url".to_string()),
                target_url: Some("https://backend.example".to_string()),
                queue_name: None,
                environment: Some("prod".to_string()),
            },
        );
        let resolver = RoutingResolver::new(store, FakeParameterStore::fixed("blue"), test_config());

        let _ = resolver.lookup_compiler_routing("gcc12").await;
        // Remove the entry; a cached lookup should still see the old result.
        resolver
            .routing_store
            .entries
            .lock()
            .unwrap()
            .remove("prod#gcc12");

        let routing = resolver.lookup_compiler_routing("gcc12").await;
        assert!(matches!(routing, ResolvedRouting::Url { .. }));
    }
}
