pub mod actor;
pub mod couriers;
pub mod deliveries;
pub mod geo;
pub mod orders;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(orders::router())
        .merge(deliveries::router())
        .merge(routes::router())
        .merge(geo::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    map_provider: &'static str,
    couriers: usize,
    orders: usize,
    deliveries: usize,
    routes: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let (orders, deliveries, routes) = state.store.read(|tables| {
        (
            tables.orders.len(),
            tables.deliveries.len(),
            tables.routes.len(),
        )
    })?;

    Ok(Json(HealthResponse {
        status: "ok",
        map_provider: state.geo.provider_name(),
        couriers: state.couriers.len(),
        orders,
        deliveries,
        routes,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
