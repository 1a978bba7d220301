use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::{self, AssignRequest, AssignedFilter, AssignedOrder};
use crate::engine::orders::{self, CreateOrderRequest};
use crate::engine::sync::{self, PreconditionReport, SyncOutcome};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::assignment::AssignmentOutcome;
use crate::models::delivery::DeliveryState;
use crate::models::order::{Order, OrderStatus};
use crate::models::page::{Page, PageRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/ledger", patch(update_ledger))
        .route("/orders/:id/loaded", post(mark_loaded).delete(clear_loaded))
        .route(
            "/orders/:id/preconditions",
            get(check_preconditions).post(recheck_preconditions),
        )
        .route("/assignments", post(assign_order).get(list_assignments))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct UpdateLedgerRequest {
    pub ledger_party_ref: Option<String>,
    pub ledger_order_ref: Option<String>,
}

/// Flat on purpose: `serde_urlencoded` cannot feed numbers through `flatten`.
#[derive(Deserialize)]
pub struct AssignmentsQuery {
    pub state: Option<DeliveryState>,
    pub courier_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::intake(&state, payload).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::get_order(&state, id)?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::update_status(&state, &actor, id, payload.status)?))
}

async fn update_ledger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLedgerRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(sync::update_ledger_refs(
        &state,
        id,
        payload.ledger_party_ref,
        payload.ledger_order_ref,
    )?))
}

async fn mark_loaded(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(sync::mark_loaded(&state, &actor, id)?))
}

async fn clear_loaded(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<PreconditionReport>, AppError> {
    Ok(Json(sync::clear_loaded(&state, &actor, id)?))
}

async fn check_preconditions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PreconditionReport>, AppError> {
    Ok(Json(sync::check_preconditions(&state, id)?))
}

async fn recheck_preconditions(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(sync::recheck(&state, id)?))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<AssignmentOutcome>, AppError> {
    Ok(Json(assignment::assign(&state, &actor, payload)?))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<AssignmentsQuery>,
) -> Result<Json<Page<AssignedOrder>>, AppError> {
    let filter = AssignedFilter {
        state: query.state,
        courier_id: query.courier_id,
        from: query.from,
        to: query.to,
    };
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(assignment::list_assigned(&state, &actor, filter, page)?))
}
