//! Axum router setup for the Foresight RPC Proxy.

use std::sync::Arc;

use alloy_primitives::B256;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::confirmation::{ApprovalStatus, ConfirmationError, PendingConfirmation, PendingState, Resolution};
use crate::context::{EngineContext, Mutation};
use crate::rpc::{self, UNKNOWN_WEBSITE};
use crate::simulation::{GovernanceError, GovernanceSimulation, SimulationError};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use crate::visualize::{visualize_simulator_state, VisualizedSimulatorState};

type ApiError = (StatusCode, Json<ErrorResponse>);

// ── Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chain_id: u64,
    pub anchor_block: u64,
    pub pending_confirmations: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A pending confirmation as the presentation layer sees it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationView {
    pub unique_request_identifier: u64,
    pub method: String,
    pub website: String,
    pub created: DateTime<Utc>,
    pub approval_status: ApprovalStatus,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<VisualizedSimulatorState>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approve: bool,
}

#[derive(Debug, Serialize)]
pub struct ClosedResponse {
    pub closed: usize,
}

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn simulation_error(err: SimulationError) -> ApiError {
    let status = match err {
        SimulationError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
        SimulationError::Rpc(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.user_message())
}

fn parse_identifier(raw: &str) -> Result<B256, ApiError> {
    raw.parse::<B256>()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("invalid transaction identifier {raw}")))
}

async fn confirmation_view(ctx: &EngineContext, item: PendingConfirmation) -> ConfirmationView {
    let (error, simulation) = match &item.state {
        PendingState::Simulated { state } => (None, Some(visualize_simulator_state(state, &ctx.metadata).await)),
        PendingState::FailedToSimulate { message } => (Some(message.clone()), None),
        PendingState::Crafting | PendingState::Simulating => (None, None),
    };
    ConfirmationView {
        unique_request_identifier: item.unique_request_identifier,
        method: item.method,
        website: item.website,
        created: item.created,
        approval_status: item.approval_status,
        state: item.state.label(),
        error,
        simulation,
    }
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /: Main JSON-RPC endpoint.
async fn handle_rpc(
    State(ctx): State<Arc<EngineContext>>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let website = headers
        .get(header::ORIGIN)
        .and_then(|origin| origin.to_str().ok())
        .unwrap_or(UNKNOWN_WEBSITE)
        .to_string();
    let response = rpc::handle_rpc(&ctx, req, &website).await;
    (StatusCode::OK, Json(response))
}

/// GET /confirmations: pending items with their simulation.
async fn list_confirmations(State(ctx): State<Arc<EngineContext>>) -> Json<Vec<ConfirmationView>> {
    let mut views = Vec::new();
    for item in ctx.confirmations.list() {
        views.push(confirmation_view(&ctx, item).await);
    }
    Json(views)
}

/// POST /confirmations/:id: approve or reject one item.
async fn decide_confirmation(
    State(ctx): State<Arc<EngineContext>>,
    Path(id): Path<u64>,
    Json(decision): Json<DecisionRequest>,
) -> Result<StatusCode, ApiError> {
    let resolution = if decision.approve {
        Resolution::Approved
    } else {
        Resolution::Rejected
    };
    match ctx.confirmations.resolve(id, resolution) {
        Ok(()) => Ok(StatusCode::OK),
        Err(err @ ConfirmationError::Unknown(_)) => Err(api_error(StatusCode::NOT_FOUND, err)),
        Err(err @ ConfirmationError::AlreadyResolved(_)) => Err(api_error(StatusCode::CONFLICT, err)),
    }
}

/// DELETE /confirmations: the dialog was closed.
async fn close_confirmations(State(ctx): State<Arc<EngineContext>>) -> Json<ClosedResponse> {
    Json(ClosedResponse {
        closed: ctx.confirmations.close_all(),
    })
}

/// GET /simulation: the current overlay.
async fn get_simulation(State(ctx): State<Arc<EngineContext>>) -> Json<VisualizedSimulatorState> {
    let state = ctx.current_state();
    Json(visualize_simulator_state(&state, &ctx.metadata).await)
}

/// POST /simulation/reset: drop everything from the overlay.
async fn reset_simulation(
    State(ctx): State<Arc<EngineContext>>,
) -> Result<Json<VisualizedSimulatorState>, ApiError> {
    let state = ctx.apply(Mutation::Reset).await.map_err(simulation_error)?;
    info!("Simulation reset");
    Ok(Json(visualize_simulator_state(&state, &ctx.metadata).await))
}

/// DELETE /simulation/transactions/:id: remove one transaction.
async fn remove_transaction(
    State(ctx): State<Arc<EngineContext>>,
    Path(id): Path<String>,
) -> Result<Json<VisualizedSimulatorState>, ApiError> {
    let identifier = parse_identifier(&id)?;
    let state = ctx
        .apply(Mutation::Remove(identifier))
        .await
        .map_err(simulation_error)?;
    Ok(Json(visualize_simulator_state(&state, &ctx.metadata).await))
}

/// POST /simulation/transactions/:id/governance: run the proposal a vote
/// would pass.
async fn simulate_governance(
    State(ctx): State<Arc<EngineContext>>,
    Path(id): Path<String>,
) -> Result<Json<GovernanceSimulation>, ApiError> {
    let identifier = parse_identifier(&id)?;
    match ctx.simulate_governance_vote(identifier).await {
        Ok(simulation) => Ok(Json(simulation)),
        Err(GovernanceError::Simulation(err)) => Err(simulation_error(err)),
        Err(err @ GovernanceError::MissingAbi) => Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, err)),
        Err(err @ GovernanceError::Other(_)) => Err(api_error(StatusCode::BAD_GATEWAY, err)),
    }
}

/// GET /health: Health check endpoint.
async fn health(State(ctx): State<Arc<EngineContext>>) -> Json<HealthResponse> {
    let state = ctx.current_state();
    Json(HealthResponse {
        status: "ok".into(),
        chain_id: state.chain_id,
        anchor_block: state.anchor_block_number,
        pending_confirmations: ctx.confirmations.len(),
    })
}

// ── Router ──────────────────────────────────────────────────────

/// Build the Axum router with the RPC endpoint and the confirmation API.
pub fn build_router(ctx: Arc<EngineContext>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/rpc", post(handle_rpc))
        .route("/confirmations", get(list_confirmations).delete(close_confirmations))
        .route("/confirmations/:id", post(decide_confirmation))
        .route("/simulation", get(get_simulation))
        .route("/simulation/reset", post(reset_simulation))
        .route("/simulation/transactions/:id", delete(remove_transaction))
        .route("/simulation/transactions/:id/governance", post(simulate_governance))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ── Tests ───────────────────────────────────────────────────────
