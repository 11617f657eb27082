//! Queue message construction and the out-of-band overflow envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Fields that default to an empty value when the parsed request body does
/// not supply them. Defaults never overwrite a value the body already set;
/// callers must merge the body in before calling [`apply_defaults`].
const DEFAULTABLE_FIELDS: &[(&str, fn() -> Value)] = &[
    ("source", || json!("")),
    ("options", || json!([])),
    ("filters", || json!({})),
    ("backendOptions", || json!({})),
    ("tools", || json!([])),
    ("libraries", || json!([])),
    ("files", || json!([])),
    ("executeParameters", || json!({})),
];

/// Builds the queue message for one compile/cmake request.
///
/// Merge order: the router-controlled fields (`guid`, `compilerId`,
/// `isCMake`, `headers`, `queryStringParameters`) are inserted first, the
/// parsed request body is then overlaid on top of them, and finally any
/// still-missing [`DEFAULTABLE_FIELDS`] are filled in.
pub fn build_queue_message(
    guid: &str,
    compiler_id: &str,
    is_cmake: bool,
    headers: Value,
    query_string_parameters: Value,
    parsed_body: Value,
) -> Value {
    let mut message = Map::new();
    message.insert("guid".to_string(), json!(guid));
    message.insert("compilerId".to_string(), json!(compiler_id));
    message.insert("isCMake".to_string(), json!(is_cmake));
    message.insert("headers".to_string(), headers);
    message.insert(
        "queryStringParameters".to_string(),
        query_string_parameters,
    );

    if let Value::Object(body_fields) = parsed_body {
        for (key, value) in body_fields {
            message.insert(key, value);
        }
    }

    apply_defaults(&mut message);

    Value::Object(message)
}

fn apply_defaults(message: &mut Map<String, Value>) {
    for (field, default_fn) in DEFAULTABLE_FIELDS {
        message.entry(field.to_string()).or_insert_with(default_fn);
    }
}

/// Small reference envelope enqueued in place of a queue message that
/// exceeded the configured size limit; the full message lives in the object
/// store at `{s3_bucket}/{s3_key}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub guid: String,
    #[serde(rename = "compilerId")]
    pub compiler_id: String,
    #[serde(rename = "s3Bucket")]
    pub s3_bucket: String,
    #[serde(rename = "s3Key")]
    pub s3_key: String,
    #[serde(rename = "originalSize")]
    pub original_size: usize,
    pub timestamp: String,
}

impl OverflowEnvelope {
    pub const KIND: &'static str = "s3-overflow";

    pub fn new(
        guid: &str,
        compiler_id: &str,
        s3_bucket: &str,
        s3_key: &str,
        original_size: usize,
        timestamp: &str,
    ) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            guid: guid.to_string(),
            compiler_id: compiler_id.to_string(),
            s3_bucket: s3_bucket.to_string(),
            s3_key: s3_key.to_string(),
            original_size,
            timestamp: timestamp.to_string(),
        }
    }
}
