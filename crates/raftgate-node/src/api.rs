//! HTTP API for the replicated key space.
//!
//! Every path is a key. `GET` reads the counter, `POST`, `PUT` and `PATCH`
//! increment it and `DELETE` removes it. Any other method gets `405`.
//! A write with a non-empty `return_value` query parameter responds with
//! the updated counter.

use crate::gateway::{Gateway, GatewayError};
use crate::observability::{metrics_handler, request_id_middleware, RequestId};
use axum::{
    body::Bytes,
    extract::{Query, State},
    Extension,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use raftgate_statemachine::Verb;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Query parameter requesting the updated value after a write.
pub const RETURN_VALUE_PARAM: &str = "return_value";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidQuerySyntax(_) | GatewayError::InvalidEntrySyntax(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::OperationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::SnapshotIo(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Creates the key space router. Every path is routed to the key handler.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_key)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Creates the router served on the metrics listener.
pub fn create_metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

async fn handle_key(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    serve_key(&state.gateway, &method, uri.path(), &params, body)
        .await
        .inspect_err(|e| {
            debug!(
                request_id = %request_id.0,
                key = uri.path(),
                error = %e,
                "request failed"
            )
        })
}

async fn serve_key(
    gateway: &Gateway,
    method: &Method,
    key: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    if *method == Method::GET {
        let value = gateway.read_key(key).await?;
        return Ok(plain_text(value));
    }

    let verb = Verb::parse(method.as_str());
    let return_value = params
        .get(RETURN_VALUE_PARAM)
        .is_some_and(|v| !v.is_empty());

    match gateway.write_key(verb, key, body, return_value).await? {
        Some(value) => Ok(plain_text(value)),
        None => Ok(StatusCode::OK.into_response()),
    }
}

fn plain_text(value: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        value,
    )
        .into_response()
}
