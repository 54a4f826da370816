//! HTTP Endpoints

use axum::{
    extract::{ws::WebSocketUpgrade, Json, State},
    http::Method,
    response::Response,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::WebSocketHandler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_enabled = state.config.server.cors_enabled;

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/contacts", get(list_contacts))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Phonebook entry as shown on the dial pad
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactView {
    pub name: String,
    pub number: String,
    pub icon: Option<String>,
}

async fn list_contacts(State(state): State<AppState>) -> Json<Vec<ContactView>> {
    let contacts = state
        .phonebook
        .contacts()
        .iter()
        .map(|c| ContactView {
            name: c.name.clone(),
            number: c.number.clone(),
            icon: c.icon.clone(),
        })
        .collect();
    Json(contacts)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    WebSocketHandler::handle(ws, state)
}
