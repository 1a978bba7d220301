//! Delivery record lifecycle.
//!
//! Every state change goes through [`apply`], which checks ownership and the
//! transition table, then performs the side effects on the parent order and
//! route stop within the caller's transaction.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::models::actor::Actor;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{
    Cancellation, DeliveryEvent, DeliveryEventKind, DeliveryProof, DeliveryRecord, DeliveryState,
};
use crate::models::order::OrderStatus;
use crate::models::route::{Leg, StopState};
use crate::state::AppState;
use crate::store::Tables;

#[derive(Debug, Clone)]
pub enum Transition {
    Start { departure: Option<GeoPoint> },
    Arrive { position: GeoPoint },
    Complete { proof: DeliveryProof, distance: Option<Leg> },
    Cancel { reason: String, detail: Option<String> },
    Fail { reason: String },
}

impl Transition {
    pub fn kind(&self) -> DeliveryEventKind {
        match self {
            Transition::Start { .. } => DeliveryEventKind::Start,
            Transition::Arrive { .. } => DeliveryEventKind::Arrive,
            Transition::Complete { .. } => DeliveryEventKind::Complete,
            Transition::Cancel { .. } => DeliveryEventKind::Cancel,
            Transition::Fail { .. } => DeliveryEventKind::Fail,
        }
    }
}

/// Applies `transition` to a delivery. Rejects with `Forbidden` when the actor
/// neither owns the delivery nor holds an elevated role, and with `Conflict`
/// when the current state does not allow the event.
pub(crate) fn apply(
    tables: &mut Tables,
    delivery_id: Uuid,
    actor: &Actor,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<DeliveryRecord, AppError> {
    let kind = transition.kind();
    let current = tables.delivery(delivery_id)?;

    if !actor.may_act_for(current.courier_id) {
        return Err(AppError::forbidden(format!(
            "delivery {delivery_id} belongs to another courier"
        )));
    }

    let next = current.state.next(kind).ok_or_else(|| {
        AppError::conflict(
            ErrorCode::InvalidDeliveryState,
            format!(
                "delivery {delivery_id} cannot {} from state {}",
                kind.as_str(),
                current.state.as_str()
            ),
        )
    })?;

    let order_id = current.order_id;
    let route_id = current.route_id;

    let record = tables.delivery_mut(delivery_id)?;
    record.state = next;

    match transition {
        Transition::Start { departure } => {
            record.departed_at = Some(now);
            record.departure = departure;
            tables.order_mut(order_id)?.set_status(OrderStatus::Shipped, now);
            if let Some(route_id) = route_id {
                if let Some(stop) = tables.stop_for_order_mut(route_id, order_id) {
                    stop.state = StopState::EnRoute;
                }
            }
        }
        Transition::Arrive { position } => {
            record.arrived_at = Some(now);
            record.arrival = Some(position);
        }
        Transition::Complete { proof, distance } => {
            record.delivered_at = Some(now);
            record.duration_minutes = record.departed_at.map(|at| (now - at).num_minutes());
            if let Some(leg) = distance {
                record.distance_km = Some(leg.distance_km);
                record.distance_source = Some(leg.source);
            }
            record.proof = Some(proof);

            let order = tables.order_mut(order_id)?;
            order.set_status(OrderStatus::Delivered, now);
            order.delivered_at = Some(now);
            if let Some(route_id) = route_id {
                if let Some(stop) = tables.stop_for_order_mut(route_id, order_id) {
                    stop.state = StopState::Delivered;
                }
            }
        }
        Transition::Cancel { reason, detail } => {
            record.cancelled_at = Some(now);
            record.cancellation = Some(Cancellation {
                reason,
                detail,
                by: actor.id,
            });
            release(tables, delivery_id, now)?;
        }
        Transition::Fail { reason } => {
            record.cancelled_at = Some(now);
            record.cancellation = Some(Cancellation {
                reason,
                detail: None,
                by: actor.id,
            });
            release(tables, delivery_id, now)?;
        }
    }

    tables.delivery(delivery_id).cloned()
}

/// Detaches a terminated delivery from its route and clears the order's
/// logistics projection. A shipped order goes back to the pool.
fn release(tables: &mut Tables, delivery_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
    let record = tables.delivery_mut(delivery_id)?;
    let order_id = record.order_id;
    let route_id = record.route_id.take();

    if let Some(route_id) = route_id {
        if let Some(stop) = tables.stop_for_order_mut(route_id, order_id) {
            if stop.state.is_open() {
                stop.state = StopState::Cancelled;
            }
        }
    }

    let order = tables.order_mut(order_id)?;
    order.clear_logistics(now);
    if order.status == OrderStatus::Shipped {
        order.set_status(OrderStatus::InProcess, now);
    }

    Ok(())
}

/// Commits one transition and publishes the resulting event.
fn commit(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    transition: Transition,
) -> Result<DeliveryRecord, AppError> {
    let started = Instant::now();
    let kind = transition.kind();
    let now = Utc::now();

    let record = state
        .store
        .transaction(|tables| apply(tables, delivery_id, actor, transition, now))?;

    state
        .metrics
        .delivery_transitions_total
        .with_label_values(&[kind.as_str()])
        .inc();
    state.metrics.observe(kind.as_str(), started);
    state.publish(vec![DeliveryEvent::from_record(&record, now)]);

    info!(
        delivery_id = %record.id,
        order_id = %record.order_id,
        courier_id = %record.courier_id,
        state = record.state.as_str(),
        "delivery {}",
        kind.as_str()
    );

    Ok(record)
}

pub fn get(state: &AppState, actor: &Actor, delivery_id: Uuid) -> Result<DeliveryRecord, AppError> {
    let record = state.store.read(|tables| tables.delivery(delivery_id).cloned())??;
    if !actor.may_act_for(record.courier_id) {
        return Err(AppError::forbidden(format!(
            "delivery {delivery_id} belongs to another courier"
        )));
    }
    Ok(record)
}

/// Deliveries of `courier_id` (the caller by default), newest first.
pub fn list_for_courier(
    state: &AppState,
    actor: &Actor,
    courier_id: Option<Uuid>,
    filter: Option<DeliveryState>,
) -> Result<Vec<DeliveryRecord>, AppError> {
    let courier_id = courier_id.unwrap_or(actor.id);
    if !actor.may_act_for(courier_id) {
        return Err(AppError::forbidden(
            "only elevated roles may list another courier's deliveries",
        ));
    }

    let mut records: Vec<DeliveryRecord> = state.store.read(|tables| {
        tables
            .deliveries
            .values()
            .filter(|d| d.courier_id == courier_id)
            .filter(|d| filter.map_or(true, |wanted| d.state == wanted))
            .cloned()
            .collect()
    })?;
    records.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
    Ok(records)
}

/// Departure defaults to the courier's last known position.
pub fn start(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    departure: Option<GeoPoint>,
) -> Result<DeliveryRecord, AppError> {
    let departure = match departure {
        Some(point) => Some(point),
        None => {
            let courier_id = state
                .store
                .read(|tables| tables.delivery(delivery_id).map(|d| d.courier_id))??;
            state
                .couriers
                .get(&courier_id)
                .and_then(|c| c.last_position)
        }
    };

    commit(state, actor, delivery_id, Transition::Start { departure })
}

pub fn arrive(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    position: GeoPoint,
) -> Result<DeliveryRecord, AppError> {
    if !position.is_valid() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "position",
            "arrival coordinates are out of range",
        ));
    }

    commit(state, actor, delivery_id, Transition::Arrive { position })
}

/// Distance is measured departure → arrival before the transaction opens;
/// an unreachable provider yields an approximate figure.
pub async fn complete(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    proof: DeliveryProof,
) -> Result<DeliveryRecord, AppError> {
    let snapshot = get(state, actor, delivery_id)?;

    let distance = match (snapshot.departure, snapshot.arrival) {
        (Some(from), Some(to)) if snapshot.state.next(DeliveryEventKind::Complete).is_some() => {
            Some(state.geo.measure(from, to).await)
        }
        _ => None,
    };

    commit(
        state,
        actor,
        delivery_id,
        Transition::Complete { proof, distance },
    )
}

pub fn fail(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    reason: String,
) -> Result<DeliveryRecord, AppError> {
    let reason = reason.trim().to_string();
    if reason.is_empty() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "reason",
            "a failure reason is required",
        ));
    }

    commit(state, actor, delivery_id, Transition::Fail { reason })
}
