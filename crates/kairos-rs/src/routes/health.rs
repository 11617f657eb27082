//! `GET /healthcheck`, per spec.md §6.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::app_state::AppState;

pub async fn healthcheck(state: web::Data<AppState>) -> HttpResponse {
    let websocket = if state.event_bus.connected() {
        "connected"
    } else {
        "disconnected"
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "websocket": websocket,
    }))
}

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthcheck", web::get().to(healthcheck));
}
