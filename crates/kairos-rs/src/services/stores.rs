//! Concrete bindings for the four abstract external collaborators: the
//! routing table, the object store, the message queue, and the parameter
//! store. Each is exposed as a small async trait so the services that
//! consume them can be tested against in-memory fakes.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::models::routing::RawRoutingEntry;

/// Point-read access to the routing table keyed by `{environment}#{compilerId}`
/// with a legacy bare-`compilerId` fallback.
///
/// The production binding is `aws-sdk-s3`, reading small JSON blobs named the
/// same way a DynamoDB point-read would be keyed (see DESIGN.md for why this
/// substitutes for the DynamoDB-shaped store the wire contract describes).
#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RawRoutingEntry>, StoreError>;
}

/// Read/write access to the overflow and compilation-results object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), StoreError>;
}

/// Publishes queue messages with FIFO semantics.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish_fifo(
        &self,
        queue_url: &str,
        body: &str,
        message_group_id: &str,
        deduplication_id: &str,
    ) -> Result<(), StoreError>;
}

/// Reads the active-color parameter for a deployment environment.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, path: &str) -> Result<String, StoreError>;
}

#[derive(Debug, thiserror::Error)]
#[error("external store error: {0}")]
pub struct StoreError(pub String);

/// `aws-sdk-s3`-backed [`RoutingStore`], reading `{key}.json` blobs from the
/// bucket named by the configured routing table name.
#[derive(Clone)]
pub struct S3RoutingStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3RoutingStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl RoutingStore for S3RoutingStore {
    async fn get(&self, key: &str) -> Result<Option<RawRoutingEntry>, StoreError> {
        let object_key = format!("{}.json", key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if is_not_found(&err) {
                    return Ok(None);
                }
                return Err(StoreError(err.to_string()));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError(e.to_string()))?
            .into_bytes();

        let entry: RawRoutingEntry =
            serde_json::from_slice(&bytes).map_err(|e| StoreError(e.to_string()))?;
        Ok(Some(entry))
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if format!("{:?}", service_err.err()).contains("NoSuchKey")
    )
}

/// `aws-sdk-s3`-backed [`ObjectStore`].
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError(e.to_string()))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));

        for (k, v) in metadata {
            request = request.metadata(*k, *v);
        }

        request.send().await.map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }
}

/// `aws-sdk-sqs`-backed [`QueuePublisher`].
#[derive(Clone)]
pub struct SqsQueuePublisher {
    client: aws_sdk_sqs::Client,
}

impl SqsQueuePublisher {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueuePublisher for SqsQueuePublisher {
    async fn publish_fifo(
        &self,
        queue_url: &str,
        body: &str,
        message_group_id: &str,
        deduplication_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .message_group_id(message_group_id)
            .message_deduplication_id(deduplication_id)
            .send()
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }
}

/// `aws-sdk-ssm`-backed [`ParameterStore`].
#[derive(Clone)]
pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParameterStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, path: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .get_parameter()
            .name(path)
            .send()
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        output
            .parameter
            .and_then(|p| p.value)
            .ok_or_else(|| StoreError(format!("parameter {path} has no value")))
    }
}

/// In-memory fakes used by service unit tests.
#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRoutingStore {
        pub entries: Mutex<HashMap<String, RawRoutingEntry>>,
    }

    #[async_trait]
    impl RoutingStore for FakeRoutingStore {
        async fn get(&self, key: &str) -> Result<Option<RawRoutingEntry>, StoreError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }
    }

    #[derive(Default)]
    pub struct FakeObjectStore {
        pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| StoreError(format!("no object at {bucket}/{key}")))
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            _content_type: &str,
            _metadata: &[(&str, &str)],
        ) -> Result<(), StoreError> {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), body);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeQueuePublisher {
        pub published: Mutex<Vec<(String, String, String, String)>>,
    }

    #[async_trait]
    impl QueuePublisher for FakeQueuePublisher {
        async fn publish_fifo(
            &self,
            queue_url: &str,
            body: &str,
            message_group_id: &str,
            deduplication_id: &str,
        ) -> Result<(), StoreError> {
            self.published.lock().unwrap().push((
                queue_url.to_string(),
                body.to_string(),
                message_group_id.to_string(),
                deduplication_id.to_string(),
            ));
            Ok(())
        }
    }

    pub struct FakeParameterStore {
        pub value: Mutex<Result<String, String>>,
    }

    impl FakeParameterStore {
        pub fn fixed(value: &str) -> Self {
            Self {
                value: Mutex::new(Ok(value.to_string())),
            }
        }

        pub fn failing() -> Self {
            Self {
                value: Mutex::new(Err("parameter store unavailable".to_string())),
            }
        }
    }

    #[async_trait]
    impl ParameterStore for FakeParameterStore {
        async fn get_parameter(&self, _path: &str) -> Result<String, StoreError> {
            self.value
                .lock()
                .unwrap()
                .clone()
                .map_err(StoreError)
        }
    }
}
