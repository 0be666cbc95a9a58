//! HTTP API over the transaction manager

use crate::config::ApiConfig;
use crate::error::{TxManagerError, TxManagerResult};
use crate::manager::TxManager;
use crate::types::{BatchItem, ExportFormat, HistoryFilter, TxOptions};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TxManager>,
}

/// Build the API router
pub fn router(manager: Arc<TxManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/estimate", post(estimate_fee))
        .route("/transactions", post(submit_transaction))
        .route("/transactions/pending", get(get_pending))
        .route("/transactions/batch", post(submit_batch))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/cancel", post(cancel_transaction))
        .route("/transactions/:id/speed-up", post(speed_up_transaction))
        .route("/history", get(get_history))
        .route("/history/export", get(export_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { manager })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, manager: Arc<TxManager>) -> TxManagerResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TxManagerError::Internal(format!("Failed to bind API server to {}: {}", addr, e)))?;
    axum::serve(listener, router(manager))
        .await
        .map_err(|e| TxManagerError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pending: state.manager.pending().await.len(),
        watchers: state.manager.active_watchers(),
    })
}

async fn get_pending(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.pending().await)
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.manager.get_transaction(&id).await {
        Some(tx) => Ok(Json(tx)),
        None => Err(ApiError::NotFound(format!("Transaction {} not found", id))),
    }
}

async fn get_history(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> impl IntoResponse {
    Json(state.manager.get_history(&filter).await)
}

async fn export_history(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = query.format.unwrap_or(ExportFormat::Json);
    let body = state.manager.export_history(format).await?;

    let content_type = match format {
        ExportFormat::Csv => "text/csv",
        ExportFormat::Json => "application/json",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn estimate_fee(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let estimate = state
        .manager
        .estimate_fee(
            &request.from,
            &request.to,
            &request.value,
            request.data.as_deref(),
            request.chain_id,
        )
        .await?;
    Ok(Json(estimate))
}

async fn submit_transaction(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state
        .manager
        .submit(
            &request.from,
            &request.to,
            &request.value,
            request.data.as_deref(),
            request.options,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state.manager.submit_batch(&request.from, request.items).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state.manager.cancel(&id).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn speed_up_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<SpeedUpRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let multiplier = body.and_then(|Json(request)| request.multiplier);
    let tx = state.manager.speed_up(&id, multiplier).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// Error returned by API handlers
pub enum ApiError {
    Manager(TxManagerError),
    NotFound(String),
}

impl From<TxManagerError> for ApiError {
    fn from(err: TxManagerError) -> Self {
        ApiError::Manager(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, tx_id, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, None, message),
            ApiError::Manager(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "Request failed");
                }
                (status, err.tx_id().map(str::to_string), err.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message, tx_id })).into_response()
    }
}

fn status_for(err: &TxManagerError) -> StatusCode {
    match err {
        TxManagerError::Validation(_) => StatusCode::BAD_REQUEST,
        TxManagerError::ReplacementNotAllowed { .. }
        | TxManagerError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        TxManagerError::Estimation(_) | TxManagerError::Submission { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Request and response types

#[derive(Deserialize)]
struct SubmitRequest {
    from: String,
    to: String,
    value: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    options: TxOptions,
}

#[derive(Deserialize)]
struct BatchRequest {
    from: String,
    items: Vec<BatchItem>,
}

#[derive(Deserialize)]
struct EstimateRequest {
    from: String,
    to: String,
    value: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    chain_id: Option<u64>,
}

#[derive(Deserialize)]
struct SpeedUpRequest {
    multiplier: Option<f64>,
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<ExportFormat>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    pending: usize,
    watchers: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::state::MemoryStore;
    use crate::testing::{AcceptingSigner, FakeLedger, ALICE, BOB};
    use crate::types::{GasPrice, Transaction};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let manager = TxManager::new(
            ManagerConfig {
                default_chain_id: Some(1),
                ..Default::default()
            },
            Arc::new(FakeLedger::new(0, GasPrice::legacy(20_000_000_000u64))),
            Arc::new(AcceptingSigner),
            Arc::new(MemoryStore::new()),
            None,
        )
        .unwrap();
        router(Arc::new(manager))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_submit_then_cancel() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/transactions",
                serde_json::json!({ "from": ALICE, "to": BOB, "value": "1.0" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let tx: Transaction = serde_json::from_slice(&body).unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/transactions/{}/cancel", tx.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Second cancel targets a transaction already moved to history
        let response = app
            .oneshot(post_json(
                &format!("/transactions/{}/cancel", tx.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let response = app()
            .oneshot(post_json(
                "/transactions",
                serde_json::json!({ "from": "0x12", "to": BOB, "value": "1.0" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let response = app()
            .oneshot(Request::get("/transactions/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_export_csv_content_type() {
        let response = app()
            .oneshot(
                Request::get("/history/export?format=csv")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    }
}
