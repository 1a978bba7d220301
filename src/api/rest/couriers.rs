use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::available_couriers;
use crate::error::{AppError, ErrorCode};
use crate::models::actor::Role;
use crate::models::assignment::CandidateCourier;
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/available", get(list_available))
        .route("/couriers/:id/active", patch(update_courier_active))
        .route("/couriers/:id/location", patch(update_courier_location))
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub active: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub order_id: Option<Uuid>,
}

fn validate_location(location: &GeoPoint) -> Result<(), AppError> {
    if location.is_valid() {
        Ok(())
    } else {
        Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "location",
            "coordinates are out of range",
        ))
    }
}

/// Mirrors a user from the identity store into the dispatch directory.
async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "name",
            "name cannot be empty",
        ));
    }
    if let Some(location) = &payload.location {
        validate_location(location)?;
    }

    let courier = Courier {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name.trim().to_string(),
        role: payload.role,
        active: payload.active,
        last_position: payload.location,
        updated_at: Utc::now(),
    };

    state.couriers.insert(courier.id, courier.clone());
    tracing::info!(courier_id = %courier.id, role = %courier.role, "courier registered");
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    let mut couriers: Vec<Courier> = state
        .couriers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    couriers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(couriers)
}

async fn list_available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<CandidateCourier>>, AppError> {
    Ok(Json(available_couriers(&state, query.order_id)?))
}

async fn update_courier_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<Courier>, AppError> {
    let mut courier = state.couriers.get_mut(&id).ok_or_else(|| {
        AppError::not_found(ErrorCode::CourierNotFound, format!("courier {id} not found"))
    })?;

    courier.active = payload.active;
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    validate_location(&payload.location)?;
    let mut courier = state.couriers.get_mut(&id).ok_or_else(|| {
        AppError::not_found(ErrorCode::CourierNotFound, format!("courier {id} not found"))
    })?;

    courier.last_position = Some(payload.location);
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}
