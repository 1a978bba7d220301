use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::cancel_and_reassign;
use crate::engine::deliveries;
use crate::error::{AppError, ErrorCode};
use crate::models::actor::Actor;
use crate::models::assignment::ReassignmentOutcome;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{DeliveryProof, DeliveryRecord, DeliveryState};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/start", post(start_delivery))
        .route("/deliveries/:id/arrive", post(arrive_delivery))
        .route("/deliveries/:id/complete", post(complete_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
        .route("/deliveries/:id/fail", post(fail_delivery))
}

#[derive(Deserialize)]
pub struct DeliveriesQuery {
    pub state: Option<DeliveryState>,
    pub courier_id: Option<Uuid>,
}

#[derive(Default, Deserialize)]
pub struct StartRequest {
    pub departure: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
    pub detail: Option<String>,
}

#[derive(Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Vec<DeliveryRecord>>, AppError> {
    Ok(Json(deliveries::list_for_courier(
        &state,
        &actor,
        query.courier_id,
        query.state,
    )?))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRecord>, AppError> {
    Ok(Json(deliveries::get(&state, &actor, id)?))
}

/// An empty body yields the default payload. A body that is present must be
/// valid JSON for `T`.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        AppError::invalid_field(ErrorCode::InvalidInput, "body", format!("malformed body: {err}"))
    })
}

/// The body is optional; without one the courier's last position is used.
async fn start_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<DeliveryRecord>, AppError> {
    let payload: StartRequest = optional_body(&body)?;
    Ok(Json(deliveries::start(&state, &actor, id, payload.departure)?))
}

async fn arrive_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<GeoPoint>,
) -> Result<Json<DeliveryRecord>, AppError> {
    Ok(Json(deliveries::arrive(&state, &actor, id, payload)?))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<DeliveryRecord>, AppError> {
    let proof: DeliveryProof = optional_body(&body)?;
    Ok(Json(deliveries::complete(&state, &actor, id, proof).await?))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<ReassignmentOutcome>, AppError> {
    Ok(Json(cancel_and_reassign(
        &state,
        &actor,
        id,
        payload.reason,
        payload.detail,
    )?))
}

async fn fail_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<FailRequest>,
) -> Result<Json<DeliveryRecord>, AppError> {
    Ok(Json(deliveries::fail(&state, &actor, id, payload.reason)?))
}
