//! Result correlator: owns the waiter map, multiplexing the single event-bus
//! connection across concurrently in-flight requests, per spec.md §4.5.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout as tokio_timeout;

use crate::config::Config;
use crate::models::error::RouterError;
use crate::services::eventbus::EventBusClient;
use crate::services::stores::ObjectStore;

/// Fields whose presence on a delivered message means it already carries its
/// payload and should not be treated as a lightweight overflow pointer, per
/// spec.md §4.5.1.
const PAYLOAD_FIELDS: &[&str] = &["asm", "stdout", "stderr", "code", "output", "result"];

pub struct Correlator<O: ObjectStore> {
    waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    event_bus: EventBusClient,
    object_store: O,
    config: Config,
}

impl<O: ObjectStore> Correlator<O> {
    pub fn new(event_bus: EventBusClient, object_store: O, config: Config) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            event_bus,
            object_store,
            config,
        }
    }

    /// `subscribe(correlationId)` per spec.md §4.5. Does not register a
    /// waiter — that happens in [`Self::wait_for_result`].
    pub fn subscribe(&self, correlation_id: &str) -> Result<(), RouterError> {
        self.event_bus
            .subscribe(correlation_id)
            .map_err(|e| RouterError::SubscribeFailed {
                guid: correlation_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// `unsubscribe(correlationId)` per spec.md §4.5: removes any waiter and
    /// asks the event bus to drop the subscription. Best-effort — failures
    /// are logged, not propagated.
    pub fn unsubscribe(&self, correlation_id: &str) {
        self.waiters.lock().unwrap().remove(correlation_id);
        if let Err(err) = self.event_bus.unsubscribe(correlation_id) {
            debug!("best-effort unsubscribe for {correlation_id} failed: {err}");
        }
    }

    /// `waitForResult(correlationId, timeoutSeconds)` per spec.md §4.5.
    pub async fn wait_for_result(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<Value, RouterError> {
        let (tx, rx) = oneshot::channel();

        {
            let mut waiters = self.waiters.lock().unwrap();
            if waiters.contains_key(correlation_id) {
                return Err(RouterError::Internal(format!(
                    "waitForResult called twice for correlation id {correlation_id}"
                )));
            }
            waiters.insert(correlation_id.to_string(), tx);
        }

        match tokio_timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(RouterError::Internal(format!(
                "waiter for {correlation_id} was dropped without a result"
            ))),
            Err(_) => {
                self.waiters.lock().unwrap().remove(correlation_id);
                if let Err(err) = self.event_bus.unsubscribe(correlation_id) {
                    debug!("best-effort unsubscribe after timeout for {correlation_id} failed: {err}");
                }
                Err(RouterError::WaitTimeout {
                    guid: correlation_id.to_string(),
                    timeout_seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Consumes decoded event-bus frames until the channel closes. Intended
    /// to be spawned once per process alongside the event-bus client.
    pub async fn run_message_loop(&self, mut message_rx: mpsc::UnboundedReceiver<Value>) {
        while let Some(message) = message_rx.recv().await {
            self.on_message(message).await;
        }
        warn!("event bus message channel closed, correlator message loop exiting");
    }

    /// Handles one decoded bus message, per spec.md §4.5 "On bus message".
    async fn on_message(&self, message: Value) {
        let Some(guid) = message.get("guid").and_then(Value::as_str).map(str::to_string) else {
            return;
        };

        let waiter = self.waiters.lock().unwrap().remove(&guid);
        let Some(waiter) = waiter else {
            // No registered waiter: another instance's delivery, or a request
            // that already timed out. Silently ignored per spec.md §4.5.
            return;
        };

        if let Err(err) = self.event_bus.ack(&guid) {
            debug!("best-effort ack for {guid} failed: {err}");
        }

        // Drop local subscription bookkeeping now, before the potentially
        // `await`-ing resolve below, so a reconnect racing an overflowed-result
        // fetch doesn't spuriously resubscribe an already-delivered topic.
        if let Err(err) = self.event_bus.mark_delivered(&guid) {
            debug!("best-effort mark-delivered for {guid} failed: {err}");
        }

        let resolved = self.resolve_result(message).await;

        if let Err(err) = self.event_bus.unsubscribe(&guid) {
            debug!("best-effort unsubscribe after delivery for {guid} failed: {err}");
        }

        let _ = waiter.send(resolved);
    }

    /// Resolves an overflowed result by fetching its object, per spec.md
    /// §4.5.1. Messages that already carry payload fields are used as-is.
    async fn resolve_result(&self, message: Value) -> Value {
        let s3_key = message.get("s3Key").and_then(Value::as_str).map(str::to_string);

        let Some(s3_key) = s3_key else {
            return message;
        };

        let has_payload = PAYLOAD_FIELDS.iter().any(|field| message.get(field).is_some());
        if has_payload {
            return message;
        }

        let guid = message
            .get("guid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let key = format!("{}{}", self.config.compilation_results_prefix, s3_key);

        match self
            .object_store
            .get_object(&self.config.compilation_results_bucket, &key)
            .await
        {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(fetched)) => {
                    let mut merged = fetched;
                    if let Value::Object(lightweight) = message {
                        for (key, value) in lightweight {
                            merged.insert(key, value);
                        }
                    }
                    Value::Object(merged)
                }
                _ => synthetic_error_result(&guid),
            },
            Err(err) => {
                warn!("failed to fetch overflowed result for {guid}: {err}");
                synthetic_error_result(&guid)
            }
        }
    }
}

/// Synthetic error body returned when an overflowed result can't be fetched
/// or decoded, per spec.md §4.5.1.
fn synthetic_error_result(guid: &str) -> Value {
    json!({
        "code": -1,
        "okToCache": false,
        "stdout": [],
        "stderr": [{ "text": "An internal error has occurred while retrieving the compilation result" }],
        "execTime": 0,
        "timedOut": false,
        "guid": guid,
    })
}
