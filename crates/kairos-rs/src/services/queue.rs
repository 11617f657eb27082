//! Queue submission path: body parsing, queue message assembly, size-triggered
//! overflow to the object store, and FIFO publish, per spec.md §4.3.

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;

use crate::config::Config;
use crate::models::queue::{build_queue_message, OverflowEnvelope};
use crate::services::stores::{ObjectStore, QueuePublisher, StoreError};

/// Group id all compile/cmake messages publish under — a single FIFO lane is
/// sufficient because ordering across distinct correlation ids is irrelevant.
const MESSAGE_GROUP_ID: &str = "default";

pub struct QueueSubmitter<O: ObjectStore, Q: QueuePublisher> {
    object_store: O,
    queue_publisher: Q,
    config: Config,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueSubmitError {
    #[error("failed to write overflow object: {0}")]
    OverflowWriteFailed(#[from] StoreError),
    #[error("failed to publish to queue: {0}")]
    PublishFailed(String),
}

impl<O: ObjectStore, Q: QueuePublisher> QueueSubmitter<O, Q> {
    pub fn new(object_store: O, queue_publisher: Q, config: Config) -> Self {
        Self {
            object_store,
            queue_publisher,
            config,
        }
    }

    /// `sendToQueue` per spec.md §4.3. `content_type` and `raw_body` drive the
    /// body-parsing step; `queue_url` is the already-resolved destination.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_to_queue(
        &self,
        correlation_id: &str,
        compiler_id: &str,
        content_type: Option<&str>,
        raw_body: &[u8],
        is_cmake: bool,
        headers: Value,
        query_string_parameters: Value,
        environment: &str,
        queue_url: &str,
    ) -> Result<(), QueueSubmitError> {
        let parsed_body = parse_body(content_type, raw_body);

        let message = build_queue_message(
            correlation_id,
            compiler_id,
            is_cmake,
            headers,
            query_string_parameters,
            parsed_body,
        );

        let serialized = serde_json::to_vec(&message).expect("queue message always serializes");

        let to_publish = if serialized.len() > self.config.sqs_max_message_size {
            self.overflow(correlation_id, compiler_id, environment, serialized)
                .await?
        } else {
            serialized
        };

        let body = String::from_utf8(to_publish).expect("serde_json output is always valid UTF-8");

        self.queue_publisher
            .publish_fifo(queue_url, &body, MESSAGE_GROUP_ID, correlation_id)
            .await
            .map_err(|e| QueueSubmitError::PublishFailed(e.0))?;

        Ok(())
    }

    async fn overflow(
        &self,
        correlation_id: &str,
        compiler_id: &str,
        environment: &str,
        serialized: Vec<u8>,
    ) -> Result<Vec<u8>, QueueSubmitError> {
        let original_size = serialized.len();
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
        let key = format!(
            "{}{}/{}/{}.json",
            self.config.s3_overflow_prefix, environment, timestamp, correlation_id
        );

        warn!(
            "queue message for {correlation_id} ({original_size} bytes) exceeds \
             {} byte limit, overflowing to s3://{}/{key}",
            self.config.sqs_max_message_size, self.config.s3_overflow_bucket
        );

        self.object_store
            .put_object(
                &self.config.s3_overflow_bucket,
                &key,
                serialized,
                "application/json",
                &[
                    ("guid", correlation_id),
                    ("compilerId", compiler_id),
                    ("environment", environment),
                    ("originalSize", &original_size.to_string()),
                ],
            )
            .await?;

        let envelope = OverflowEnvelope::new(
            correlation_id,
            compiler_id,
            &self.config.s3_overflow_bucket,
            &key,
            original_size,
            &timestamp,
        );

        debug!("overflow envelope written for {correlation_id}");

        Ok(serde_json::to_vec(&envelope).expect("overflow envelope always serializes"))
    }
}

/// Parses the raw request body per its content type, per spec.md §4.3 step 1.
/// A JSON content type that fails to parse, or any non-JSON content type,
/// falls back to `{source: rawBody}`; an empty body becomes an empty mapping.
fn parse_body(content_type: Option<&str>, raw_body: &[u8]) -> Value {
    if raw_body.is_empty() {
        return Value::Object(Default::default());
    }

    let is_json = content_type
        .map(|c| c.to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        if let Ok(value) = serde_json::from_slice::<Value>(raw_body) {
            return value;
        }
    }

    let source = String::from_utf8_lossy(raw_body).to_string();
    serde_json::json!({ "source": source })
}
