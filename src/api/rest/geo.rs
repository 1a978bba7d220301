use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorCode};
use crate::geo::provider::RouteSummary;
use crate::models::courier::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/geo/geocode", get(geocode))
        .route("/geo/reverse", get(reverse_geocode))
        .route("/geo/route", post(compute_route))
}

#[derive(Deserialize)]
pub struct GeocodeQuery {
    pub address: String,
}

#[derive(Serialize)]
pub struct ReverseResponse {
    pub address: String,
}

#[derive(Deserialize)]
pub struct RouteRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default)]
    pub waypoints: Vec<GeoPoint>,
}

fn ensure_valid(point: &GeoPoint, field: &'static str) -> Result<(), AppError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            field,
            "coordinates are out of range",
        ))
    }
}

async fn geocode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GeocodeQuery>,
) -> Result<Json<GeoPoint>, AppError> {
    let address = query.address.trim();
    if address.is_empty() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "address",
            "address cannot be empty",
        ));
    }

    let point = state.geo.geocode(address).await.ok_or_else(|| {
        AppError::not_found(ErrorCode::AddressNotFound, format!("no match for {address:?}"))
    })?;
    Ok(Json(point))
}

async fn reverse_geocode(
    State(state): State<Arc<AppState>>,
    Query(point): Query<GeoPoint>,
) -> Result<Json<ReverseResponse>, AppError> {
    ensure_valid(&point, "lat")?;

    let address = state.geo.reverse_geocode(point).await.ok_or_else(|| {
        AppError::not_found(
            ErrorCode::AddressNotFound,
            format!("no address near {},{}", point.lat, point.lon),
        )
    })?;
    Ok(Json(ReverseResponse { address }))
}

async fn compute_route(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RouteRequest>,
) -> Result<Json<RouteSummary>, AppError> {
    ensure_valid(&payload.origin, "origin")?;
    ensure_valid(&payload.destination, "destination")?;
    for waypoint in &payload.waypoints {
        ensure_valid(waypoint, "waypoints")?;
    }

    let route = state
        .geo
        .compute_route(payload.origin, payload.destination, &payload.waypoints)
        .await
        .ok_or_else(|| {
            AppError::not_found(ErrorCode::RouteUnavailable, "no route between the given points")
        })?;
    Ok(Json(route))
}
