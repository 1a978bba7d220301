use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::deliveries::{self, Transition};
use crate::engine::scoring::rank_candidates;
use crate::engine::sync::promote_if_ready;
use crate::error::{AppError, ErrorCode};
use crate::models::actor::Actor;
use crate::models::assignment::{AssignmentOutcome, CandidateCourier, ReassignmentOutcome};
use crate::models::delivery::{DeliveryEvent, DeliveryRecord, DeliveryState};
use crate::models::order::{Order, OrderStatus};
use crate::models::page::{Page, PageRequest};
use crate::state::AppState;
use crate::store::Tables;

fn require_elevated(actor: &Actor, what: &str) -> Result<(), AppError> {
    if actor.is_elevated() {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("{what} requires an elevated role")))
    }
}

fn non_empty(reason: Option<String>) -> Option<String> {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub reassignment_reason: Option<String>,
}

/// Assigns an order to a courier.
///
/// Same courier again returns the existing record. A different courier needs
/// a reassignment reason; the old record is cancelled in the same
/// transaction that creates the new one.
pub fn assign(
    state: &AppState,
    actor: &Actor,
    request: AssignRequest,
) -> Result<AssignmentOutcome, AppError> {
    require_elevated(actor, "assigning orders")?;
    let started = Instant::now();
    let courier = state.eligible_courier(request.courier_id)?;
    let reason = non_empty(request.reassignment_reason);
    let now = Utc::now();

    let result = state.store.transaction(|tables| {
        let order = tables.order(request.order_id)?;
        let existing = tables.active_delivery_for_order(order.id).cloned();

        if let Some(existing) = &existing {
            if existing.courier_id == courier.id {
                return Ok((
                    AssignmentOutcome {
                        delivery: existing.clone(),
                        already_assigned: true,
                        replaced_delivery_id: None,
                        promoted_to_in_process: false,
                    },
                    Vec::new(),
                ));
            }
        }

        if order.status != OrderStatus::Confirmed {
            return Err(AppError::conflict(
                ErrorCode::InvalidOrderState,
                format!(
                    "order {} cannot be assigned from status {:?}",
                    order.id, order.status
                ),
            ));
        }

        let mut events = Vec::new();
        let mut replaced_delivery_id = None;
        if let Some(existing) = existing {
            let reason = reason
                .clone()
                .ok_or_else(AppError::reassignment_reason_required)?;
            let cancelled = deliveries::apply(
                tables,
                existing.id,
                actor,
                Transition::Cancel {
                    reason,
                    detail: Some(format!("reassigned to courier {}", courier.id)),
                },
                now,
            )?;
            events.push(DeliveryEvent::from_record(&cancelled, now));
            replaced_delivery_id = Some(cancelled.id);
        }

        let delivery = create_delivery(tables, request.order_id, courier.id, now)?;
        events.push(DeliveryEvent::from_record(&delivery, now));
        let sync = promote_if_ready(tables, request.order_id, now)?;

        Ok((
            AssignmentOutcome {
                delivery,
                already_assigned: false,
                replaced_delivery_id,
                promoted_to_in_process: sync.promoted,
            },
            events,
        ))
    });

    state.metrics.observe("assign", started);
    let (outcome, events) = match result {
        Ok(done) => done,
        Err(err) => {
            state
                .metrics
                .assignments_total
                .with_label_values(&["rejected"])
                .inc();
            return Err(err);
        }
    };

    let label = if outcome.already_assigned {
        "already_assigned"
    } else if outcome.replaced_delivery_id.is_some() {
        "reassigned"
    } else {
        "assigned"
    };
    state.metrics.assignments_total.with_label_values(&[label]).inc();
    state.publish(events);

    info!(
        order_id = %outcome.delivery.order_id,
        courier_id = %outcome.delivery.courier_id,
        delivery_id = %outcome.delivery.id,
        outcome = label,
        "order assignment"
    );

    Ok(outcome)
}

/// Inserts a fresh `assigned` record and points the order at the courier.
pub(crate) fn create_delivery(
    tables: &mut Tables,
    order_id: Uuid,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DeliveryRecord, AppError> {
    let delivery = DeliveryRecord::new(order_id, courier_id, now);
    tables.deliveries.insert(delivery.id, delivery.clone());

    let order = tables.order_mut(order_id)?;
    order.assigned_courier = Some(courier_id);
    order.updated_at = now;

    Ok(delivery)
}

/// Cancels a delivery and hands the order to the best-ranked other courier.
///
/// Finding nobody is a valid outcome: the order stays unassigned and the
/// response carries a caveat instead of an error.
pub fn cancel_and_reassign(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
    reason: Option<String>,
    detail: Option<String>,
) -> Result<ReassignmentOutcome, AppError> {
    let started = Instant::now();
    let reason = non_empty(reason).ok_or_else(AppError::reassignment_reason_required)?;
    let couriers = state.eligible_couriers();
    let ceiling = state.settings.max_inflight_deliveries;
    let now = Utc::now();

    let (outcome, events) = state.store.transaction(|tables| {
        let cancelled = deliveries::apply(
            tables,
            delivery_id,
            actor,
            Transition::Cancel {
                reason: reason.clone(),
                detail: detail.clone(),
            },
            now,
        )?;
        let mut events = vec![DeliveryEvent::from_record(&cancelled, now)];

        let order = tables.order(cancelled.order_id)?;
        if order.status.is_terminal() {
            return Ok((
                ReassignmentOutcome {
                    cancelled,
                    replacement: None,
                    reassigned: false,
                    caveat: Some(format!("order is {:?}; not reassigned", order.status)),
                },
                events,
            ));
        }

        let destination = order.destination;
        let candidates: Vec<_> = couriers
            .iter()
            .filter(|c| c.id != cancelled.courier_id)
            .cloned()
            .collect();
        let ranked = rank_candidates(candidates, tables, ceiling, destination.as_ref());

        let Some(best) = ranked.into_iter().next() else {
            return Ok((
                ReassignmentOutcome {
                    cancelled,
                    replacement: None,
                    reassigned: false,
                    caveat: Some(
                        "no courier available; order returned to the unassigned pool".to_string(),
                    ),
                },
                events,
            ));
        };

        let replacement = create_delivery(tables, cancelled.order_id, best.courier.id, now)?;
        events.push(DeliveryEvent::from_record(&replacement, now));
        promote_if_ready(tables, cancelled.order_id, now)?;

        Ok((
            ReassignmentOutcome {
                cancelled,
                replacement: Some(replacement),
                reassigned: true,
                caveat: None,
            },
            events,
        ))
    })?;

    state.metrics.observe("cancel_and_reassign", started);
    state
        .metrics
        .delivery_transitions_total
        .with_label_values(&["cancel"])
        .inc();
    state
        .metrics
        .reassignments_total
        .with_label_values(&[if outcome.reassigned {
            "reassigned"
        } else {
            "unassigned"
        }])
        .inc();
    state.publish(events);

    match &outcome.replacement {
        Some(replacement) => info!(
            order_id = %outcome.cancelled.order_id,
            from_courier = %outcome.cancelled.courier_id,
            to_courier = %replacement.courier_id,
            "delivery reassigned"
        ),
        None => warn!(
            order_id = %outcome.cancelled.order_id,
            from_courier = %outcome.cancelled.courier_id,
            "delivery cancelled without replacement"
        ),
    }

    Ok(outcome)
}

/// Active couriers under the in-flight ceiling, ranked against the order's
/// destination when one is given.
pub fn available_couriers(
    state: &AppState,
    order_id: Option<Uuid>,
) -> Result<Vec<CandidateCourier>, AppError> {
    let couriers = state.eligible_couriers();
    let ceiling = state.settings.max_inflight_deliveries;

    state.store.read(|tables| -> Result<Vec<CandidateCourier>, AppError> {
        let destination = match order_id {
            Some(id) => tables.order(id)?.destination,
            None => None,
        };
        Ok(rank_candidates(couriers, tables, ceiling, destination.as_ref()))
    })?
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignedFilter {
    pub state: Option<DeliveryState>,
    pub courier_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedOrder {
    pub delivery: DeliveryRecord,
    pub order: Order,
}

/// Admin view of orders held by couriers outside any open route.
pub fn list_assigned(
    state: &AppState,
    actor: &Actor,
    filter: AssignedFilter,
    page: PageRequest,
) -> Result<Page<AssignedOrder>, AppError> {
    require_elevated(actor, "listing assignments")?;

    let mut rows: Vec<AssignedOrder> = state.store.read(|tables| {
        tables
            .deliveries
            .values()
            .filter(|d| match filter.state {
                Some(wanted) => d.state == wanted,
                None => d.is_active(),
            })
            .filter(|d| filter.courier_id.map_or(true, |id| d.courier_id == id))
            .filter(|d| filter.from.map_or(true, |from| d.assigned_at >= from))
            .filter(|d| filter.to.map_or(true, |to| d.assigned_at <= to))
            .filter(|d| tables.open_route_for_order(d.order_id).is_none())
            .filter_map(|d| {
                tables.orders.get(&d.order_id).map(|order| AssignedOrder {
                    delivery: d.clone(),
                    order: order.clone(),
                })
            })
            .collect()
    })?;

    rows.sort_by(|a, b| b.delivery.assigned_at.cmp(&a.delivery.assigned_at));
    Ok(Page::slice(rows, page))
}
