//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::catalog::Catalog;
use crate::orchestrator::{Attempt, OrchestratorError, PaymentOrchestrator};
use crate::selector::{CreditSelector, SelectionError};
use crate::types::{Network, PaymentState, WalletKind};
use crate::wallet::{WalletConnector, WalletError};

pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub selector: Mutex<CreditSelector>,
    pub wallet: Arc<WalletConnector>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub payment_asset: String,
    pub recipient_address: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects))
        .route(
            "/selection",
            get(get_selection).put(put_selection).delete(clear_selection),
        )
        .route("/selection/preview", get(get_preview))
        .route("/wallet", get(get_wallet))
        .route("/wallet/connect", post(connect_wallet))
        .route("/wallet/disconnect", post(disconnect_wallet))
        .route("/wallet/network", post(switch_network))
        .route("/wallet/balance", post(refresh_balance))
        .route("/payment", get(get_payment))
        .route("/payment/start", post(start_payment))
        .route("/payment/retry", post(retry_payment))
        .route("/payment/cancel", post(cancel_payment))
        .route("/payment/reset", post(reset_payment))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub project_id: String,
    pub quantity: Decimal,
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub kind: WalletKind,
}

#[derive(Deserialize)]
pub struct NetworkRequest {
    pub network: Network,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type Accepted = (StatusCode, Json<PaymentState>);

fn error(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn selection_error(e: SelectionError) -> ApiError {
    error(StatusCode::UNPROCESSABLE_ENTITY, e)
}

fn wallet_error(e: WalletError) -> ApiError {
    let status = match e {
        WalletError::UserRejected | WalletError::SigningRejected => StatusCode::FORBIDDEN,
        WalletError::NotConnected => StatusCode::PRECONDITION_FAILED,
        WalletError::WalletUnavailable(_)
        | WalletError::NetworkSwitchFailed(_)
        | WalletError::BalanceFetchFailed(_)
        | WalletError::SigningError(_) => StatusCode::BAD_GATEWAY,
    };
    error(status, e)
}

fn orchestrator_error(e: OrchestratorError) -> ApiError {
    let status = match e {
        OrchestratorError::NotConnected => StatusCode::PRECONDITION_FAILED,
        OrchestratorError::NoSelection => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::CONFLICT,
    };
    error(status, e)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /projects`
pub async fn list_projects(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.projects().to_vec())
}

/// `GET /selection`
pub async fn get_selection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let selector = state.selector.lock().await;
    Json(selector.state().clone())
}

/// `PUT /selection`
///
/// Rejected selections leave the previous one in place.
pub async fn put_selection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    let mut selector = state.selector.lock().await;
    selector
        .select(&req.project_id, req.quantity)
        .map(|s| Json(s.clone()))
        .map_err(selection_error)
}

/// `DELETE /selection`
pub async fn clear_selection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut selector = state.selector.lock().await;
    selector.clear();
    Json(selector.state().clone())
}

/// `GET /selection/preview`
pub async fn get_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let selector = state.selector.lock().await;
    selector
        .preview(&state.payment_asset, &state.recipient_address)
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "no project selected"))
}

/// `GET /wallet`
pub async fn get_wallet(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.wallet.snapshot())
}

/// `POST /wallet/connect`
pub async fn connect_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    state.wallet.connect(req.kind).await.map(Json).map_err(wallet_error)
}

/// `POST /wallet/disconnect`
pub async fn disconnect_wallet(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.wallet.disconnect().await;
    StatusCode::NO_CONTENT
}

/// `POST /wallet/network`
pub async fn switch_network(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NetworkRequest>,
) -> impl IntoResponse {
    state
        .wallet
        .switch_network(req.network)
        .await
        .map(Json)
        .map_err(wallet_error)
}

/// `POST /wallet/balance`
pub async fn refresh_balance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .wallet
        .refresh_balance()
        .await
        .map(Json)
        .map_err(wallet_error)
}

/// `GET /payment`
pub async fn get_payment(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.state().await)
}

/// `POST /payment/start`
///
/// Accepts the attempt and drives it in the background; poll `GET /payment`.
pub async fn start_payment(State(state): State<Arc<AppState>>) -> Result<Accepted, ApiError> {
    let selection = {
        let selector = state.selector.lock().await;
        selector.state().clone()
    };
    let attempt = state
        .orchestrator
        .begin_purchase(selection)
        .await
        .map_err(orchestrator_error)?;
    Ok(run_in_background(&state.orchestrator, attempt).await)
}

/// `POST /payment/retry`
pub async fn retry_payment(State(state): State<Arc<AppState>>) -> Result<Accepted, ApiError> {
    let attempt = state
        .orchestrator
        .begin_retry()
        .await
        .map_err(orchestrator_error)?;
    Ok(run_in_background(&state.orchestrator, attempt).await)
}

/// `POST /payment/cancel`
pub async fn cancel_payment(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .orchestrator
        .cancel()
        .await
        .map(Json)
        .map_err(|e| {
            warn!("Cancel refused: {e}");
            orchestrator_error(e)
        })
}

/// `POST /payment/reset`
pub async fn reset_payment(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .orchestrator
        .reset()
        .await
        .map(Json)
        .map_err(orchestrator_error)
}

async fn run_in_background(orchestrator: &Arc<PaymentOrchestrator>, attempt: Attempt) -> Accepted {
    let snapshot = orchestrator.state().await;
    let runner = Arc::clone(orchestrator);
    tokio::spawn(async move {
        runner.run(attempt).await;
    });
    (StatusCode::ACCEPTED, Json(snapshot))
}
