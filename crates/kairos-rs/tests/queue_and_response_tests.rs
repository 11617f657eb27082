//! Integration-style tests exercising the queue message, overflow, and
//! response-shaping contracts across their public APIs.

use kairos_rs::models::queue::{build_queue_message, OverflowEnvelope};
use kairos_rs::services::response_shape::{render_plain_text, strip_internal_fields};
use serde_json::json;

#[test]
fn queue_message_round_trips_through_overflow_envelope() {
    let original = build_queue_message(
        "guid-123",
        "gcc12",
        false,
        json!({ "accept": "application/json" }),
        json!({ "filterAnsi": "true" }),
        json!({ "source": "int main(){return 0;}", "options": ["-O2"] }),
    );

    let serialized = serde_json::to_vec(&original).unwrap();
    let envelope = OverflowEnvelope::new(
        "guid-123",
        "gcc12",
        "temp-storage.godbolt.org",
        "prod/2026-01-01T00-00-00-000Z/guid-123.json",
        serialized.len(),
        "2026-01-01T00:00:00.000Z",
    );

    // The object written to the store is the serialized original message;
    // fetching and decoding it must reproduce it byte-for-byte.
    let refetched: serde_json::Value = serde_json::from_slice(&serialized).unwrap();
    assert_eq!(refetched, original);

    let envelope_value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(envelope_value["type"], json!("s3-overflow"));
    assert_eq!(envelope_value["guid"], json!("guid-123"));
    assert_eq!(envelope_value["originalSize"], json!(serialized.len()));
}

#[test]
fn response_shaping_strips_internal_fields_before_either_projection() {
    let result = json!({
        "guid": "guid-1",
        "s3Key": "abc.json",
        "code": 0,
        "asm": [{"text": "ret"}],
    });

    let stripped = strip_internal_fields(result);
    assert!(stripped.get("guid").is_none());
    assert!(stripped.get("s3Key").is_none());

    let reencoded: serde_json::Value = serde_json::from_str(&serde_json::to_string(&stripped).unwrap()).unwrap();
    assert_eq!(reencoded["code"], json!(0));
    assert_eq!(reencoded["asm"][0]["text"], json!("ret"));
}

#[test]
fn plain_text_projection_reports_nonzero_exit_and_streams() {
    let result = json!({
        "code": 1,
        "asm": [{"text": "mov eax, 1"}],
        "stderr": [{"text": "error: something broke"}],
    });

    let text = render_plain_text(&result, false);
    assert!(text.contains("# Compilation provided by Compiler Explorer at https://godbolt.org/"));
    assert!(text.contains("mov eax, 1"));
    assert!(text.contains("# Compiler exited with result code 1"));
    assert!(text.contains("stderr: error: something broke"));
}
