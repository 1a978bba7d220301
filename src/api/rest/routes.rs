use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::routes::{self, CreateRouteRequest, FinishRouteRequest, RouteFilter};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::page::{Page, PageRequest};
use crate::models::route::{AlternatePlanView, Route, RouteState, RouteView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/routes", post(create_route).get(list_routes))
        .route("/routes/active", get(active_route))
        .route("/routes/:id", get(get_route))
        .route("/routes/:id/alternates", post(propose_alternate))
        .route("/routes/:id/alternates/:plan_id", patch(toggle_alternate))
        .route("/routes/:id/accept", post(accept_route))
        .route("/routes/:id/start", post(start_route))
        .route("/routes/:id/finish", post(finish_route))
        .route("/routes/:id/cancel", post(cancel_route))
}

#[derive(Deserialize)]
pub struct RoutesQuery {
    pub state: Option<RouteState>,
    pub courier_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Deserialize)]
pub struct ActiveRouteQuery {
    pub courier_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ProposeAlternateRequest {
    pub new_sequence: Vec<Uuid>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ToggleAlternateRequest {
    pub active: bool,
}

async fn create_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateRouteRequest>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::create_route(&state, &actor, payload).await?))
}

async fn list_routes(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<RoutesQuery>,
) -> Result<Json<Page<Route>>, AppError> {
    let filter = RouteFilter {
        state: query.state,
        courier_id: query.courier_id,
        from: query.from,
        to: query.to,
    };
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(routes::list_routes(&state, &actor, filter, page)?))
}

/// `null` when the courier has no open route.
async fn active_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ActiveRouteQuery>,
) -> Result<Json<Option<RouteView>>, AppError> {
    let courier_id = query.courier_id.unwrap_or(actor.id);
    if !actor.may_act_for(courier_id) {
        return Err(AppError::forbidden(
            "only elevated roles may read another courier's route",
        ));
    }
    Ok(Json(routes::active_route(&state, courier_id)?))
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::get_route(&state, &actor, id)?))
}

async fn propose_alternate(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProposeAlternateRequest>,
) -> Result<Json<AlternatePlanView>, AppError> {
    Ok(Json(routes::propose_alternate_order(
        &state,
        &actor,
        id,
        payload.new_sequence,
        payload.reason,
    )?))
}

async fn toggle_alternate(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((id, plan_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ToggleAlternateRequest>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::toggle_alternate(
        &state,
        &actor,
        id,
        plan_id,
        payload.active,
    )?))
}

async fn accept_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::accept_route(&state, &actor, id)?))
}

async fn start_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::start_route(&state, &actor, id)?))
}

async fn finish_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<FinishRouteRequest>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::finish_route(&state, &actor, id, payload)?))
}

async fn cancel_route(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteView>, AppError> {
    Ok(Json(routes::cancel_route(&state, &actor, id)?))
}
