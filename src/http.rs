//! HTTP transport for the JSON-RPC surface: `POST /mcp`, single object or
//! batch array, no session management (stdio and HTTP are peers, not a
//! session hierarchy). Wrong method or path fall through to axum's default
//! 405/404 — no custom handler is registered for them.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::rpc::{dispatch_request, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new().route("/mcp", post(handle_mcp_post)).layer(TraceLayer::new_for_http()).with_state(state)
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap_or_default()))
        .unwrap()
}

async fn handle_mcp_post(State(state): State<Arc<AppState>>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            let err = serde_json::json!({ "jsonrpc": "2.0", "id": null, "error": { "code": -32700, "message": "parse error" } });
            return json_response(StatusCode::BAD_REQUEST, &err);
        }
    };

    if let Value::Array(requests) = parsed {
        let mut responses = Vec::new();
        for req in &requests {
            if let Some(resp) = dispatch_request(&state, req).await {
                responses.push(resp);
            }
        }
        return json_response(StatusCode::OK, &Value::Array(responses));
    }

    match dispatch_request(&state, &parsed).await {
        Some(resp) => json_response(StatusCode::OK, &resp),
        None => Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap(),
    }
}
