//! HTTP API for the payroll engine.
//!
//! A thin [`axum`] surface for the orchestrating caller: trigger a
//! period run, follow or cancel it, and read the stored calculations.
//! Runs execute on tokio's blocking pool, since the batch runner drives
//! its own rayon pool synchronously.
//!
//! The engine does not guard against two runs of the same period; this
//! layer does, with one run slot per period.  The slot is owned by the
//! blocking task, so it is held until the run ends even if the client
//! goes away.  A second run request while one is in flight is answered
//! with `409 Conflict`.

use crate::engine::{BatchResult, PayrollRunner, Progress, RunHandle, RunState};
use crate::error::PayrollError;
use crate::models::{CalculatedPayroll, PayrollPeriod};
use crate::store::{fetch, RecordStore};
use crate::summary::{period_records, summarize, PeriodSummary};
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::info;

type RunningPeriods = Arc<Mutex<HashSet<PayrollPeriod>>>;

/// Application state shared across requests.
pub struct AppState {
    pub runner: Arc<PayrollRunner>,
    pub store: Arc<dyn RecordStore>,
    /// Periods with a run in flight; entries leave when the run ends.
    running: RunningPeriods,
    /// Handle of the latest run of each period, kept after the run for
    /// progress queries. Grows by one entry per distinct period.
    runs: RwLock<HashMap<PayrollPeriod, RunHandle>>,
}

impl AppState {
    pub fn new(runner: Arc<PayrollRunner>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            runner,
            store,
            running: Arc::default(),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

fn lock_running(running: &RunningPeriods) -> MutexGuard<'_, HashSet<PayrollPeriod>> {
    match running.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive claim on running one period; released on drop.
struct RunSlot {
    running: RunningPeriods,
    period: PayrollPeriod,
}

impl RunSlot {
    fn claim(running: &RunningPeriods, period: PayrollPeriod) -> Option<Self> {
        if !lock_running(running).insert(period) {
            return None;
        }
        Some(Self {
            running: running.clone(),
            period,
        })
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        lock_running(&self.running).remove(&self.period);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Payroll(#[from] PayrollError),
    #[error("a payroll run for {0} is already in progress")]
    RunInProgress(PayrollPeriod),
    #[error("{0} not found")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Payroll(PayrollError::InvalidPeriod { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Payroll(PayrollError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Payroll(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RunInProgress(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunStatusView {
    period: PayrollPeriod,
    state: RunState,
    cancelled: bool,
    progress: Progress,
}

/// Build the API router over an existing state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/periods/:year/:month/run", post(run_handler))
        .route("/api/periods/:year/:month/cancel", post(cancel_handler))
        .route("/api/periods/:year/:month/progress", get(progress_handler))
        .route("/api/periods/:year/:month/calculations", get(list_handler))
        .route("/api/periods/:year/:month/summary", get(summary_handler))
        .route("/api/calculations/:key", get(calculation_handler))
        .with_state(state)
}

/// Handler for POST /api/periods/:year/:month/run
async fn run_handler(
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<Json<BatchResult>, ApiError> {
    let period = PayrollPeriod::new(month, year)?;
    let slot = RunSlot::claim(&state.running, period).ok_or(ApiError::RunInProgress(period))?;

    let handle = RunHandle::new();
    state.runs.write().await.insert(period, handle.clone());

    let runner = state.runner.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        runner.run_period_with(period, &handle)
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))??;
    Ok(Json(result))
}

/// Handler for POST /api/periods/:year/:month/cancel
async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<impl IntoResponse, ApiError> {
    let period = PayrollPeriod::new(month, year)?;
    let runs = state.runs.read().await;
    match runs.get(&period) {
        // A registered handle still `Idle` belongs to a run about to start.
        Some(handle) if matches!(handle.state(), RunState::Idle | RunState::Running) => {
            handle.cancel();
            info!(%period, "payroll run cancellation requested");
            Ok((StatusCode::ACCEPTED, Json(json!({ "cancelled": true }))))
        }
        _ => Err(ApiError::NotFound(format!("running payroll for {period}"))),
    }
}

/// Handler for GET /api/periods/:year/:month/progress
async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<Json<RunStatusView>, ApiError> {
    let period = PayrollPeriod::new(month, year)?;
    let runs = state.runs.read().await;
    let handle = runs
        .get(&period)
        .ok_or_else(|| ApiError::NotFound(format!("payroll run for {period}")))?;
    Ok(Json(RunStatusView {
        period,
        state: handle.state(),
        cancelled: handle.is_cancelled(),
        progress: handle.progress(),
    }))
}

/// Handler for GET /api/periods/:year/:month/calculations
async fn list_handler(
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<Json<Vec<CalculatedPayroll>>, ApiError> {
    let period = PayrollPeriod::new(month, year)?;
    let records = period_records(state.store.as_ref(), period).map_err(PayrollError::from)?;
    Ok(Json(records))
}

/// Handler for GET /api/periods/:year/:month/summary
async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u8)>,
) -> Result<Json<PeriodSummary>, ApiError> {
    let period = PayrollPeriod::new(month, year)?;
    let records = period_records(state.store.as_ref(), period).map_err(PayrollError::from)?;
    Ok(Json(summarize(period, &records)))
}

/// Handler for GET /api/calculations/:key
async fn calculation_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<CalculatedPayroll>, ApiError> {
    fetch::<CalculatedPayroll>(state.store.as_ref(), &key)
        .map_err(PayrollError::from)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("calculation {key}")))
}

/// Bind `addr` and serve the API until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "payroll API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
