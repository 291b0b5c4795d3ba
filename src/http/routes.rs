//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::battle::command::{CommandKind, CommandPayload};
use crate::battle::error::{BattleError, RejectReason};
use crate::battle::reinforcement::ReinforcementPriority;
use crate::battle::result::{BattleRecord, BattleResult};
use crate::battle::snapshot::BattleSnapshot;
use crate::battle::supply::{SupplyState, SupplyTopUp};
use crate::battle::types::{BattleId, CharacterId, CommandId, FleetId};
use crate::delegation::DelegationState;
use crate::session::{CreateBattle, HealthReport, JoinOutcome, LeaveOutcome, ServiceError};
use crate::world::{GridCoord, WorldError};
use crate::ws::handler::ws_handler;

/// Requests slower than this are cut off
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let cors = if state.config.client_origin.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let allowed_origins: Vec<header::HeaderValue> = state
            .config
            .client_origin
            .split(',')
            .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    };

    let battle_routes = Router::new()
        .route("/battles", get(list_battles_handler).post(create_battle_handler))
        .route("/battles/:id", get(state_handler))
        .route("/battles/:id/record", get(record_handler))
        .route("/battles/:id/start", post(start_handler))
        .route("/battles/:id/pause", post(pause_handler))
        .route("/battles/:id/resume", post(resume_handler))
        .route("/battles/:id/stop", post(stop_handler))
        .route("/battles/:id/commands", post(command_handler))
        .route("/battles/:id/join", post(join_handler))
        .route("/battles/:id/leave", post(leave_handler))
        .route("/battles/:id/reinforcements", post(reinforcement_handler))
        .route("/battles/:id/retreats", post(retreat_handler))
        .route("/battles/:id/retreats/:fleet_id", delete(cancel_retreat_handler))
        .route("/battles/:id/resupply", post(resupply_handler))
        .route("/battles/:id/handoff", post(hand_off_handler))
        .route("/presence", post(presence_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .route("/health", get(health_handler))
        .route("/battles/:id/ws", get(ws_handler))
        .merge(battle_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    report: HealthReport,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        report: state.battles.health(),
    })
}

// ============================================================================
// Battle lifecycle endpoints
// ============================================================================

#[derive(Serialize)]
struct BattleListResponse {
    battles: Vec<BattleId>,
}

async fn list_battles_handler(State(state): State<AppState>) -> Json<BattleListResponse> {
    Json(BattleListResponse {
        battles: state.battles.registry().ids(),
    })
}

#[derive(Serialize)]
struct CreateBattleResponse {
    battle_id: BattleId,
}

async fn create_battle_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateBattle>,
) -> Result<(StatusCode, Json<CreateBattleResponse>), AppError> {
    let battle_id = state.battles.create_battle(req)?;
    Ok((StatusCode::CREATED, Json(CreateBattleResponse { battle_id })))
}

async fn state_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<BattleSnapshot>, AppError> {
    let snapshot = state.battles.get_state(battle_id)?;
    Ok(Json((*snapshot).clone()))
}

async fn record_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<BattleRecord>, AppError> {
    state
        .battles
        .battle_record(battle_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no record for battle {}", battle_id)))
}

#[derive(Serialize)]
struct TransitionResponse {
    /// False when the battle was already in the requested state
    changed: bool,
}

async fn start_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<TransitionResponse>, AppError> {
    let changed = state.battles.start(battle_id).await?;
    Ok(Json(TransitionResponse { changed }))
}

async fn pause_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<TransitionResponse>, AppError> {
    let changed = state.battles.pause(battle_id).await?;
    Ok(Json(TransitionResponse { changed }))
}

async fn resume_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<TransitionResponse>, AppError> {
    let changed = state.battles.resume(battle_id).await?;
    Ok(Json(TransitionResponse { changed }))
}

async fn stop_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<BattleResult>, AppError> {
    Ok(Json(state.battles.stop(battle_id).await?))
}

// ============================================================================
// Fleet endpoints
// ============================================================================

#[derive(Deserialize)]
struct CommandRequest {
    fleet_id: FleetId,
    command: CommandKind,
    #[serde(default)]
    payload: CommandPayload,
    character_id: Option<CharacterId>,
}

#[derive(Serialize)]
struct CommandResponse {
    command_id: CommandId,
}

async fn command_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), AppError> {
    let command_id = state.battles.queue_command(
        battle_id,
        req.fleet_id,
        req.command,
        req.payload,
        req.character_id,
    )?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse { command_id })))
}

#[derive(Deserialize)]
struct FleetRequest {
    fleet_id: FleetId,
    #[serde(default)]
    priority: ReinforcementPriority,
}

async fn join_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<FleetRequest>,
) -> Result<Json<JoinOutcome>, AppError> {
    Ok(Json(
        state
            .battles
            .join_battle(battle_id, req.fleet_id, req.priority)
            .await?,
    ))
}

async fn leave_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<FleetRequest>,
) -> Result<Json<LeaveOutcome>, AppError> {
    Ok(Json(state.battles.leave_battle(battle_id, req.fleet_id).await?))
}

#[derive(Serialize)]
struct ArrivalResponse {
    arrival_tick: u64,
}

async fn reinforcement_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<FleetRequest>,
) -> Result<Json<ArrivalResponse>, AppError> {
    let arrival_tick = state
        .battles
        .request_reinforcement(battle_id, req.fleet_id, req.priority)
        .await?;
    Ok(Json(ArrivalResponse { arrival_tick }))
}

#[derive(Deserialize)]
struct RetreatRequest {
    fleet_id: FleetId,
    destination: Option<GridCoord>,
}

#[derive(Serialize)]
struct RetreatResponse {
    completes_at: u64,
}

async fn retreat_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<RetreatRequest>,
) -> Result<Json<RetreatResponse>, AppError> {
    let completes_at = state
        .battles
        .request_retreat(battle_id, req.fleet_id, req.destination)
        .await?;
    Ok(Json(RetreatResponse { completes_at }))
}

async fn cancel_retreat_handler(
    State(state): State<AppState>,
    Path((battle_id, fleet_id)): Path<(BattleId, FleetId)>,
) -> Result<StatusCode, AppError> {
    state.battles.cancel_retreat(battle_id, fleet_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResupplyRequest {
    fleet_id: FleetId,
    #[serde(flatten)]
    top_up: SupplyTopUp,
}

async fn resupply_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<ResupplyRequest>,
) -> Result<Json<SupplyState>, AppError> {
    Ok(Json(
        state
            .battles
            .resupply(battle_id, req.fleet_id, req.top_up)
            .await?,
    ))
}

// ============================================================================
// Delegation endpoints
// ============================================================================

#[derive(Deserialize)]
struct HandOffRequest {
    fleet_id: FleetId,
    requester: CharacterId,
    target: CharacterId,
}

async fn hand_off_handler(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
    Json(req): Json<HandOffRequest>,
) -> Result<Json<DelegationState>, AppError> {
    Ok(Json(state.battles.hand_off(
        battle_id,
        req.fleet_id,
        req.requester,
        req.target,
    )?))
}

#[derive(Deserialize)]
struct PresenceRequest {
    character_id: CharacterId,
    online: bool,
}

#[derive(Serialize)]
struct PresenceResponse {
    /// Fleets whose delegate changed
    reassigned: usize,
}

async fn presence_handler(
    State(state): State<AppState>,
    Json(req): Json<PresenceRequest>,
) -> Json<PresenceResponse> {
    let changed = state.battles.set_presence(req.character_id, req.online);
    Json(PresenceResponse {
        reassigned: changed.len(),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Service(err) => (service_status(err), err.code()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::UnknownBattle(_) => StatusCode::NOT_FOUND,
        ServiceError::Battle(BattleError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        ServiceError::Battle(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Rejected(reason) => match reason {
            RejectReason::UnknownFleet | RejectReason::UnknownTarget | RejectReason::NoDelegation => {
                StatusCode::NOT_FOUND
            }
            RejectReason::MalformedCommand => StatusCode::BAD_REQUEST,
            RejectReason::NotController => StatusCode::FORBIDDEN,
            RejectReason::RateLimited | RejectReason::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::CONFLICT,
        },
        ServiceError::World(WorldError::UnknownFleet(_)) => StatusCode::NOT_FOUND,
        ServiceError::World(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Store(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Service(err) => err.to_string(),
            AppError::NotFound(msg) => msg.clone(),
        };

        let body = serde_json::json!({
            "code": code,
            "message": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_client_errors() {
        let err = AppError::from(ServiceError::Rejected(RejectReason::CapacityExceeded));
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "capacity_exceeded"));

        let err = AppError::from(ServiceError::Rejected(RejectReason::RateLimited));
        assert_eq!(err.status_and_code().0, StatusCode::TOO_MANY_REQUESTS);

        let err = AppError::from(ServiceError::UnknownBattle(BattleId::new()));
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "unknown_battle"));
    }
}
