//! Direct HTTP forwarding path, per spec.md §4.6.

use std::time::Duration;

use log::warn;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Hop-by-hop headers stripped from both the forwarded request and the
/// response returned to the client, per spec.md §4.6 / §8.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
];

/// Total deadline for one forwarded request, per spec.md §4.6.
const FORWARD_DEADLINE: Duration = Duration::from_secs(60);

/// Logged, not enforced: spec.md §4.6 warns on oversized forwarded bodies but
/// proceeds regardless (an explicit Open Question in spec.md §9).
const LARGE_BODY_WARNING_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request to backend timed out")]
    Timeout,
    #[error("failed to reach backend: {0}")]
    Network(String),
}

pub struct ForwardedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(30))
                .pool_max_idle_per_host(32)
                .build()
                .expect("reqwest client configuration is always valid"),
        }
    }

    /// `forward` per spec.md §4.6. `target_url` is the routing entry's
    /// target with any trailing slash already removed; the path is taken
    /// verbatim, with no `/api/compiler/...` appended.
    pub async fn forward(
        &self,
        target_url: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> Result<ForwardedResponse, ForwardError> {
        let target_url = target_url.trim_end_matches('/');

        if body.len() > LARGE_BODY_WARNING_THRESHOLD {
            warn!(
                "forwarding {} byte body to {target_url}, exceeds {LARGE_BODY_WARNING_THRESHOLD} byte warning threshold",
                body.len()
            );
        }

        let request = self
            .client
            .post(target_url)
            .timeout(FORWARD_DEADLINE)
            .headers(build_forward_headers(headers))
            .body(body);

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::Network(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let response_headers = strip_response_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| ForwardError::Network(err.to_string()))?
            .to_vec();

        Ok(ForwardedResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens multi-valued headers with `", "` joins and strips the hop-by-hop
/// set before the request is sent upstream, per spec.md §4.6 step 2.
fn build_forward_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if is_hop_by_hop(&lower) {
            continue;
        }
        match grouped.iter_mut().find(|(existing, _)| *existing == lower) {
            Some((_, values)) => values.push(value.clone()),
            None => grouped.push((lower, vec![value.clone()])),
        }
    }

    let mut map = HeaderMap::with_capacity(grouped.len());
    for (name, values) in grouped {
        let joined = values.join(", ");
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&joined),
        ) {
            map.insert(header_name, header_value);
        }
    }
    map
}

/// Strips the hop-by-hop set plus `via` from a backend's response headers,
/// per spec.md §4.6 step 4.
fn strip_response_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            if is_hop_by_hop(&lower) || lower == "via" {
                return None;
            }
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn is_hop_by_hop(lowercase_name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&lowercase_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_forward_headers_strips_hop_by_hop_and_joins_multivalue() {
        let headers = vec![
            ("Connection".to_string(), "keep-alive".to_string()),
            ("Accept".to_string(), "text/plain".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
        ];
        let map = build_forward_headers(&headers);

        assert!(!map.contains_key("connection"));
        assert!(!map.contains_key("transfer-encoding"));
        assert_eq!(map.get("accept").unwrap(), "text/plain, application/json");
    }

    #[test]
    fn strip_response_headers_removes_hop_by_hop_and_via() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("via", HeaderValue::from_static("1.1 proxy"));

        let stripped = strip_response_headers(&headers);
        let names: Vec<&str> = stripped.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"content-type"));
        assert!(!names.contains(&"transfer-encoding"));
        assert!(!names.contains(&"via"));
    }

    #[test]
    fn no_hop_by_hop_header_survives_either_direction() {
        const ALL: &[&str] = &[
            "connection",
            "upgrade",
            "proxy-authenticate",
            "proxy-authorization",
            "te",
            "trailers",
            "transfer-encoding",
        ];
        for name in ALL {
            assert!(is_hop_by_hop(name));
        }
    }
}
