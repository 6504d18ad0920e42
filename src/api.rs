//! HTTP API for the Billing Engine.
//!
//! This module exposes a minimal REST API around the billing engine
//! using the [`axum`](https://crates.io/crates/axum) framework.  Clients
//! can calculate a billing period, finalize it for a set of employees
//! and list the resulting billing records.  Engine calls are CPU and
//! store bound, so they run on tokio's blocking pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::engine::{BillingEngine, BillingStores, CancellationToken};
use crate::error::BillingError;
use crate::memory::InMemoryStore;
use crate::models::{BillingRecord, BillingRecordFilter, EmployeePeriodBillingSummary};

/// Application state shared across requests.
pub struct AppState {
    pub engine: Arc<BillingEngine>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    #[serde(alias = "startDate")]
    pub start_date: String,
    #[serde(alias = "endDate")]
    pub end_date: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    #[serde(alias = "employeeIds", alias = "userIds")]
    pub employee_ids: Vec<String>,
    #[serde(alias = "startDate")]
    pub start_date: String,
    #[serde(alias = "endDate")]
    pub end_date: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Billing(err) => match err {
                BillingError::InvalidDateRange(_) | BillingError::Cancelled => {
                    StatusCode::BAD_REQUEST
                }
                BillingError::DuplicateBillingPeriod(_) => StatusCode::CONFLICT,
                BillingError::PersistenceFailure(_) | BillingError::DirectoryUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                BillingError::UnknownBillingPolicy { .. }
                | BillingError::QuantityKindMismatch { .. }
                | BillingError::AmountOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let retryable = matches!(&self, ApiError::Billing(err) if err.is_retryable());
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "retryable": retryable,
        }));
        (status, body).into_response()
    }
}

/// Cancels the token when dropped.  Axum drops the handler future when
/// the client goes away, which stops an in-flight calculation at the
/// next employee boundary.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Build the router around an existing engine.
pub fn router(engine: Arc<BillingEngine>) -> Router {
    let state = Arc::new(AppState { engine });
    Router::new()
        .route("/api/billing/calculate", post(calculate_handler))
        .route("/api/billing/finalize", post(finalize_handler))
        .route("/api/billing/records", get(list_records_handler))
        .with_state(state)
}

/// Build the API router with an in-memory store seeded from the
/// configured dataset file.  Finalized records are kept in the
/// configured records file and reloaded on the next start.
pub fn build_router(config: &EngineConfig) -> Result<Router> {
    let store = Arc::new(InMemoryStore::open(&config.dataset_path, &config.records_path)?);
    let engine = BillingEngine::new(BillingStores::in_memory(store)).with_parallelism(config.parallel);
    Ok(router(Arc::new(engine)))
}

/// Handler for POST /api/billing/calculate
async fn calculate_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<CalculateRequest>,
) -> Result<Json<Vec<EmployeePeriodBillingSummary>>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = CancelOnDrop(cancel.clone());
    let engine = app_state.engine.clone();
    let summaries = tokio::task::spawn_blocking(move || {
        engine.calculate(&request.start_date, &request.end_date, &cancel)
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))??;
    Ok(Json(summaries))
}

/// Handler for POST /api/billing/finalize
///
/// The commit runs on a blocking task that is never aborted, so a client
/// disconnect cannot interrupt it half way.
async fn finalize_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<Vec<BillingRecord>>, ApiError> {
    if request.employee_ids.is_empty() {
        return Err(ApiError::BadRequest("employee_ids must not be empty".into()));
    }
    let engine = app_state.engine.clone();
    let records = tokio::task::spawn_blocking(move || {
        engine.finalize(&request.employee_ids, &request.start_date, &request.end_date)
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))??;
    Ok(Json(records))
}

/// Handler for GET /api/billing/records
async fn list_records_handler(
    State(app_state): State<Arc<AppState>>,
    Query(filter): Query<BillingRecordFilter>,
) -> Result<Json<Vec<BillingRecord>>, ApiError> {
    Ok(Json(app_state.engine.list_records(&filter)?))
}

/// Launch the API server.  This function builds the router from the
/// configured dataset and binds to the configured address.  It blocks
/// until the server terminates.
pub async fn serve(config: EngineConfig) -> Result<()> {
    let router = build_router(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, router).await.context("server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_app() -> std::net::SocketAddr {
        let store = Arc::new(InMemoryStore::new());
        store.add_employee(employee("e1", "Ada"));
        store.add_project(project("p", "hourly", dec!(50)));
        store.add_work_log(work_log("e1", "2024-01-10", &[("p", hours(dec!(8)))]));
        serve_router(router(Arc::new(BillingEngine::new(BillingStores::in_memory(store))))).await
    }

    async fn serve_router(app: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
        addr
    }

    async fn send_raw(
        addr: std::net::SocketAddr,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (u16, Value) {
        let mut stream = tokio::net::TcpStream::connect(addr)
            .await
            .expect("connect server");
        let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        if !payload.is_empty() {
            req.push_str("Content-Type: application/json\r\n");
            req.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        }
        req.push_str("\r\n");
        req.push_str(&payload);
        stream
            .write_all(req.as_bytes())
            .await
            .expect("write request");
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        let (head, body) = response
            .split_once("\r\n\r\n")
            .expect("http response must have separator");
        let status = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|s| s.parse::<u16>().ok())
            .expect("http status");
        (status, serde_json::from_str(body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn calculate_returns_summaries() {
        let addr = spawn_app().await;
        let (status, body) = send_raw(
            addr,
            "POST",
            "/api/billing/calculate",
            Some(serde_json::json!({"startDate": "2024-01-01", "endDate": "2024-01-15"})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body[0]["employee_id"], "e1");
        assert_eq!(body[0]["total_amount"], "400");
    }

    #[tokio::test]
    async fn calculate_rejects_reversed_range() {
        let addr = spawn_app().await;
        let (status, body) = send_raw(
            addr,
            "POST",
            "/api/billing/calculate",
            Some(serde_json::json!({"start_date": "2024-02-01", "end_date": "2024-01-01"})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn finalize_twice_conflicts() {
        let addr = spawn_app().await;
        let request = serde_json::json!({
            "employee_ids": ["e1"],
            "start_date": "2024-01-01",
            "end_date": "2024-01-15",
        });
        let (status, body) =
            send_raw(addr, "POST", "/api/billing/finalize", Some(request.clone())).await;
        assert_eq!(status, 200);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["status"], "pending");

        let (status, _) = send_raw(addr, "POST", "/api/billing/finalize", Some(request)).await;
        assert_eq!(status, 409);

        let (status, body) = send_raw(
            addr,
            "GET",
            "/api/billing/records?employee_id=e1&status=pending",
            None,
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn finalized_records_survive_a_restart() {
        let dir = std::env::temp_dir().join(format!("billing_api_restart_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let config = EngineConfig {
            dataset_path: dir.join("dataset.json"),
            records_path: dir.join("records.json"),
            ..EngineConfig::default()
        };
        std::fs::write(
            &config.dataset_path,
            serde_json::json!({
                "employees": [{"id": "e1", "name": "Ada"}],
                "projects": [{"id": "p", "name": "Atlas", "billing_type": "hourly", "rate": "50"}],
                "work_logs": [{
                    "employee_id": "e1",
                    "date": "2024-01-10",
                    "line_items": [{"project_id": "p", "quantity": {"hours": "8"}}]
                }]
            })
            .to_string(),
        )
        .expect("write dataset");
        let request = serde_json::json!({
            "employee_ids": ["e1"],
            "start_date": "2024-01-01",
            "end_date": "2024-01-15",
        });

        let first = serve_router(build_router(&config).expect("first start")).await;
        let (status, _) = send_raw(first, "POST", "/api/billing/finalize", Some(request.clone())).await;
        assert_eq!(status, 200);

        let second = serve_router(build_router(&config).expect("second start")).await;
        let (status, body) = send_raw(second, "POST", "/api/billing/finalize", Some(request)).await;
        let (_, records) = send_raw(second, "GET", "/api/billing/records", None).await;
        std::fs::remove_dir_all(&dir).expect("remove temp dir");
        assert_eq!(status, 409);
        assert_eq!(body["retryable"], false);
        assert_eq!(records.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn finalize_requires_employees() {
        let addr = spawn_app().await;
        let (status, _) = send_raw(
            addr,
            "POST",
            "/api/billing/finalize",
            Some(serde_json::json!({"employee_ids": [], "start_date": "2024-01-01", "end_date": "2024-01-15"})),
        )
        .await;
        assert_eq!(status, 400);
    }
}
