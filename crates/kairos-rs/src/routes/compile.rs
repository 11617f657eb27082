//! Router facade: the HTTP surface over the compile/cmake endpoints, per
//! spec.md §4.1.

use std::collections::HashMap;
use std::time::Duration;

use actix_web::http::header::HeaderMap;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, warn};
use serde_json::{json, Value};
use tokio::time::sleep;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::logs::strip_ansi;
use crate::models::error::RouterError;
use crate::models::routing::ResolvedRouting;
use crate::services::response_shape::{render_plain_text, strip_internal_fields};

/// Delay after subscribing before the request proceeds, giving the
/// subscription time to reach the event bus before the queue publish, per
/// spec.md §4.1 step 2 / §5 ordering guarantees.
const SUBSCRIBE_SETTLE_DELAY: Duration = Duration::from_millis(50);

const CORS_ORIGIN: (&str, &str) = ("Access-Control-Allow-Origin", "*");
const CORS_METHODS: (&str, &str) = ("Access-Control-Allow-Methods", "POST, GET, OPTIONS");
const CORS_HEADERS: (&str, &str) = ("Access-Control-Allow-Headers", "Content-Type, Accept, Authorization");

fn apply_cors(builder: &mut actix_web::HttpResponseBuilder) -> &mut actix_web::HttpResponseBuilder {
    builder
        .insert_header(CORS_ORIGIN)
        .insert_header(CORS_METHODS)
        .insert_header(CORS_HEADERS)
}

pub async fn options_preflight() -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    apply_cors(&mut builder);
    builder.finish()
}

pub async fn compile_or_cmake(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Bytes,
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let (compiler_id, kind) = path.into_inner();
    handle(req, compiler_id, kind, body, query, state).await
}

pub async fn compile_or_cmake_with_env(
    req: HttpRequest,
    path: web::Path<(String, String, String)>,
    body: web::Bytes,
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let (_env, compiler_id, kind) = path.into_inner();
    handle(req, compiler_id, kind, body, query, state).await
}

async fn handle(
    req: HttpRequest,
    compiler_id: String,
    kind: String,
    body: web::Bytes,
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let is_cmake = kind == "cmake";
    let correlation_id = Uuid::new_v4().to_string();

    if let Err(err) = state.correlator.subscribe(&correlation_id) {
        error!("subscribe failed for {correlation_id}: {err}");
        return error_response(&RouterError::SubscribeFailed {
            guid: correlation_id,
            reason: err.to_string(),
        });
    }

    sleep(SUBSCRIBE_SETTLE_DELAY).await;

    let routing = state.routing_resolver.lookup_compiler_routing(&compiler_id).await;

    match routing {
        ResolvedRouting::Url { target_url, .. } => {
            state.correlator.unsubscribe(&correlation_id);
            forward(&state, &target_url, body, req.headers()).await
        }
        ResolvedRouting::Queue { queue_url, environment } => {
            enqueue_and_wait(
                &state,
                &correlation_id,
                &compiler_id,
                is_cmake,
                body,
                req.headers(),
                &query,
                &environment,
                &queue_url,
                &req,
            )
            .await
        }
    }
}

async fn forward(
    state: &AppState,
    target_url: &str,
    body: web::Bytes,
    headers: &HeaderMap,
) -> HttpResponse {
    let header_pairs = header_pairs(headers);

    match state.forwarder.forward(target_url, body.to_vec(), &header_pairs).await {
        Ok(forwarded) => {
            if forwarded.body.len() > 1024 * 1024 {
                warn!("forwarded response body is {} bytes", forwarded.body.len());
            }

            let status = actix_web::http::StatusCode::from_u16(forwarded.status)
                .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
            let mut builder = HttpResponse::build(status);
            for (name, value) in &forwarded.headers {
                if name.eq_ignore_ascii_case("content-length") {
                    continue;
                }
                builder.insert_header((name.as_str(), value.as_str()));
            }
            builder.insert_header(("content-length", forwarded.body.len().to_string()));
            apply_cors(&mut builder);
            builder.body(forwarded.body)
        }
        Err(err) => {
            error!("forward failed: {err}");
            error_response(&RouterError::ForwardFailed(err.to_string()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn enqueue_and_wait(
    state: &AppState,
    correlation_id: &str,
    compiler_id: &str,
    is_cmake: bool,
    body: web::Bytes,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    environment: &str,
    queue_url: &str,
    req: &HttpRequest,
) -> HttpResponse {
    let content_type = req.content_type();
    let content_type = if content_type.is_empty() { None } else { Some(content_type) };

    let headers_json = headers_to_json(headers);
    let query_json = json!(query);

    if let Err(err) = state
        .queue_submitter
        .send_to_queue(
            correlation_id,
            compiler_id,
            content_type,
            &body,
            is_cmake,
            headers_json,
            query_json,
            environment,
            queue_url,
        )
        .await
    {
        error!("queue submission failed for {correlation_id}: {err}");
        state.correlator.unsubscribe(correlation_id);
        return error_response(&RouterError::QueueSubmitFailed(err.to_string()));
    }

    match state
        .correlator
        .wait_for_result(correlation_id, state.config.request_timeout)
        .await
    {
        Ok(result) => shape_response(result, req, query),
        Err(err @ RouterError::WaitTimeout { .. }) => error_response(&err),
        Err(err) => {
            error!("waitForResult failed for {correlation_id}: {err}");
            error_response(&err)
        }
    }
}

fn shape_response(result: Value, req: &HttpRequest, query: &HashMap<String, String>) -> HttpResponse {
    let result = strip_internal_fields(result);

    let accepts_plain_text = req
        .headers()
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/plain"))
        .unwrap_or(false);

    let filter_ansi = matches!(query.get("filterAnsi").map(String::as_str), Some("true") | Some("1"));

    let mut builder = HttpResponse::Ok();
    apply_cors(&mut builder);

    if accepts_plain_text {
        let text = render_plain_text(&result, filter_ansi);
        builder.content_type("text/plain; charset=utf-8").body(text)
    } else {
        let mut projected = result;
        if filter_ansi {
            strip_ansi_in_place(&mut projected);
        }
        builder.json(projected)
    }
}

/// Strips ANSI sequences from every string value reachable from `stdout` /
/// `stderr` / `asm` / `execResult`, for the JSON-response `filterAnsi` case.
fn strip_ansi_in_place(value: &mut Value) {
    match value {
        Value::String(s) => *s = strip_ansi(s),
        Value::Array(items) => items.iter_mut().for_each(strip_ansi_in_place),
        Value::Object(map) => map.values_mut().for_each(strip_ansi_in_place),
        _ => {}
    }
}

fn error_response(err: &RouterError) -> HttpResponse {
    let status = actix_web::ResponseError::status_code(err);
    let mut builder = HttpResponse::build(status);
    apply_cors(&mut builder);
    builder.json(json!({ "error": err.to_string() }))
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), json!(value));
        }
    }
    Value::Object(map)
}

pub fn configure_compile(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/compiler/{compiler_id}/{kind}")
            .route(web::post().to(compile_or_cmake))
            .route(web::method(actix_web::http::Method::OPTIONS).to(options_preflight)),
    )
    .service(
        web::resource("/{env}/api/compiler/{compiler_id}/{kind}")
            .route(web::post().to(compile_or_cmake_with_env))
            .route(web::method(actix_web::http::Method::OPTIONS).to(options_preflight)),
    );
}
