// proctorwatch/src/server.rs
//
// Violation log HTTP API.
//
//   POST /log-violation   { "type": "..." }  → 200 { message, violation }
//                                              400 { error } when type missing
//                                              500 { error } on store failure
//   GET  /violations                          → 200 [record, ...] newest first
//   GET  /health                              → 200 { status: "ok" }
//
// CORS is permissive: the monitoring client runs on another origin.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::store::SharedStore;

#[derive(Debug, Deserialize)]
struct LogViolationBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/log-violation", post(log_violation))
        .route("/violations", get(list_violations))
        .route("/health", get(health))
        .with_state(store)
        .layer(CorsLayer::permissive())
}

pub async fn serve(addr: SocketAddr, store: SharedStore) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Violation log server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(store)).await?;
    Ok(())
}

fn missing_type() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "Violation type is required" }))).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Internal server error" }))).into_response()
}

async fn log_violation(
    State(store): State<SharedStore>,
    body: Result<Json<LogViolationBody>, JsonRejection>,
) -> Response {
    let kind = match body {
        Ok(Json(LogViolationBody { kind: Some(kind) })) => kind,
        Ok(_) => return missing_type(),
        Err(e) => {
            warn!("Rejected violation body: {}", e);
            return missing_type();
        }
    };

    match store.append(&kind).await {
        Ok(violation) => {
            info!(id = %violation.id, "Violation logged: {}", violation.kind);
            Json(json!({ "message": "Violation logged", "violation": violation })).into_response()
        }
        Err(StoreError::MissingType) => missing_type(),
        Err(e) => {
            error!("Error logging violation: {}", e);
            internal_error()
        }
    }
}

async fn list_violations(State(store): State<SharedStore>) -> Response {
    match store.list_all().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            error!("Error fetching violations: {}", e);
            internal_error()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
