use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use birthbook_storage::UserStore;
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::birth::{handle_get_birthday, handle_register_birthday};
use crate::calc::handle_calc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn UserStore + Send + Sync>,
}

impl AppState {
    pub fn new(storage: Arc<dyn UserStore + Send + Sync>) -> Self {
        Self { storage }
    }
}

pub(crate) type SharedState = Arc<AppState>;

/// Wire shape shared by every response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Successful reply carrying a payload under `data`.
#[derive(Debug)]
pub struct ApiReply<T> {
    status: StatusCode,
    label: &'static str,
    data: T,
}

impl<T: Serialize> ApiReply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            label: "OK",
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            label: "Created",
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiReply<T> {
    fn into_response(self) -> Response {
        let payload = Json(Envelope {
            code: self.status.as_u16(),
            status: self.label.to_string(),
            data: Some(self.data),
        });
        (self.status, payload).into_response()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(Envelope::<()> {
            code: self.status.as_u16(),
            status: self.message,
            data: None,
        });
        (self.status, payload).into_response()
    }
}

#[derive(Debug, Serialize)]
struct PingResponse {
    msg: &'static str,
}

pub async fn start_server<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = bind_listener(addr).await?;
    info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server terminated unexpectedly")
}

/// Binds `addr`, which may be a socket address or a `host:port` pair that
/// still needs resolving (for example `localhost:5000`).
async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}; is another service using the port?"))
}

pub fn build_router(state: AppState) -> Router {
    let shared: SharedState = Arc::new(state);

    Router::new()
        .route("/ping", get(handle_ping))
        .route("/calc", post(handle_calc))
        .route(
            "/birth",
            get(handle_get_birthday).post(handle_register_birthday),
        )
        .fallback(handle_not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn handle_ping() -> ApiReply<PingResponse> {
    ApiReply::ok(PingResponse { msg: "pong" })
}

async fn handle_not_found() -> ApiError {
    ApiError::not_found("Not Found")
}

/// Unwraps a JSON body that must be an object.
pub(crate) fn require_object(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Map<String, Value>, ApiError> {
    match payload {
        Ok(Json(Value::Object(body))) => Ok(body),
        Ok(Json(other)) => {
            debug!("rejecting non-object JSON body: {}", other);
            Err(ApiError::bad_request("Bad Request"))
        }
        Err(rejection) => {
            debug!("rejecting request body: {}", rejection.body_text());
            Err(ApiError::bad_request("Bad Request"))
        }
    }
}

impl ApiError {
    pub(crate) fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub(crate) fn conflict<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub(crate) fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server Error")
    }
}
