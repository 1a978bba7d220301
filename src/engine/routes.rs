//! Route planning: bundling orders into a courier's multi-stop route,
//! alternate orderings, and the route lifecycle.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::create_delivery;
use crate::engine::deliveries::{self, Transition};
use crate::engine::sync::promote_if_ready;
use crate::error::{AppError, ErrorCode};
use crate::models::actor::Actor;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{DeliveryEvent, DeliveryProof, DeliveryRecord, DeliveryState};
use crate::models::page::{Page, PageRequest};
use crate::models::route::{
    AlternatePlan, AlternatePlanView, AlternateStop, Leg, Route, RouteState, RouteStop, RouteView,
    StopState,
};
use crate::state::AppState;
use crate::store::Tables;

const UNDELIVERED_REASON: &str = "undelivered";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRouteRequest {
    pub courier_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub order_ids: Vec<Uuid>,
    /// Re-sequence stops by nearest neighbor instead of keeping the given order.
    #[serde(default)]
    pub optimize: bool,
    pub origin: Option<GeoPoint>,
}

fn route_view(tables: &Tables, route: &Route) -> RouteView {
    let stops = tables.stops_of(route.id);
    let alternate = tables.active_plan(route.id).map(|plan| AlternatePlanView {
        id: plan.id,
        reason: plan.reason.clone(),
        active: plan.active,
        created_at: plan.created_at,
        sequence: tables.plan_sequence(plan.id),
    });

    let effective_order = match &alternate {
        Some(plan) => plan.sequence.iter().map(|row| row.order_id).collect(),
        None => stops.iter().map(|s| s.order_id).collect(),
    };

    RouteView {
        route: route.clone(),
        stops,
        alternate,
        effective_order,
    }
}

fn ensure_may_act(actor: &Actor, route: &Route) -> Result<(), AppError> {
    if actor.may_act_for(route.courier_id) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "route {} belongs to another courier",
            route.id
        )))
    }
}

fn state_conflict(route: &Route, action: &str) -> AppError {
    AppError::conflict(
        ErrorCode::InvalidRouteState,
        format!(
            "route {} cannot {action} from state {}",
            route.id,
            route.state.as_str()
        ),
    )
}

fn validate_create(request: &CreateRouteRequest) -> Result<(), AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "name",
            "name cannot be empty",
        ));
    }
    if request.capacity == 0 {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "capacity",
            "capacity must be > 0",
        ));
    }
    if request.order_ids.is_empty() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "order_ids",
            "a route needs at least one order",
        ));
    }
    if request.order_ids.len() > request.capacity as usize {
        return Err(AppError::invalid_field(
            ErrorCode::CapacityExceeded,
            "order_ids",
            format!(
                "{} orders exceed route capacity {}",
                request.order_ids.len(),
                request.capacity
            ),
        ));
    }

    let unique: HashSet<&Uuid> = request.order_ids.iter().collect();
    if unique.len() != request.order_ids.len() {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "order_ids",
            "order_ids contains duplicates",
        ));
    }

    Ok(())
}

/// Nearest-neighbor sequence over the orders that have coordinates; orders
/// without a destination keep their relative order at the end.
async fn optimized_sequence(
    state: &AppState,
    origin: Option<GeoPoint>,
    order_ids: &[Uuid],
) -> Result<Vec<(Uuid, Option<Leg>)>, AppError> {
    let Some(origin) = origin else {
        warn!("route optimization skipped: no origin known");
        return Ok(order_ids.iter().map(|id| (*id, None)).collect());
    };

    let destinations: Vec<(Uuid, Option<GeoPoint>)> = state.store.read(|tables| {
        order_ids
            .iter()
            .map(|id| (*id, tables.orders.get(id).and_then(|o| o.destination)))
            .collect()
    })?;

    let located: Vec<(Uuid, GeoPoint)> = destinations
        .iter()
        .filter_map(|(id, point)| point.map(|p| (*id, p)))
        .collect();

    let mut sequence: Vec<(Uuid, Option<Leg>)> = state
        .geo
        .nearest_neighbor_order(origin, &located)
        .await
        .into_iter()
        .map(|stop| (stop.id, Some(stop.leg)))
        .collect();
    sequence.extend(
        destinations
            .iter()
            .filter(|(_, point)| point.is_none())
            .map(|(id, _)| (*id, None)),
    );

    Ok(sequence)
}

/// Creates a planned route for one courier. Every order gets (or keeps) an
/// active delivery with that courier and a stop numbered in visiting order.
pub async fn create_route(
    state: &AppState,
    actor: &Actor,
    request: CreateRouteRequest,
) -> Result<RouteView, AppError> {
    if !actor.is_elevated() {
        return Err(AppError::forbidden("creating routes requires an elevated role"));
    }
    validate_create(&request)?;
    let started = Instant::now();
    let courier = state.eligible_courier(request.courier_id)?;

    let sequence = if request.optimize {
        optimized_sequence(
            state,
            request.origin.or(courier.last_position),
            &request.order_ids,
        )
        .await?
    } else {
        request.order_ids.iter().map(|id| (*id, None)).collect()
    };

    let now = Utc::now();
    let route_id = Uuid::new_v4();

    let (view, events) = state.store.transaction(|tables| {
        let mut events = Vec::new();

        for (position, (order_id, leg)) in sequence.iter().enumerate() {
            let order = tables.order(*order_id)?;
            if !order.status.is_routable() {
                return Err(AppError::invalid_field(
                    ErrorCode::OrderNotAssignable,
                    "order_ids",
                    format!("order {order_id} is {:?} and cannot be routed", order.status),
                ));
            }
            if let Some(other) = tables.open_route_for_order(*order_id) {
                return Err(AppError::invalid_field(
                    ErrorCode::OrderInActiveRoute,
                    "order_ids",
                    format!("order {order_id} is already in active route {other}"),
                ));
            }

            let delivery_id = match tables.active_delivery_for_order(*order_id) {
                Some(existing) if existing.courier_id != courier.id => {
                    return Err(AppError::invalid_field(
                        ErrorCode::OrderAssignedElsewhere,
                        "order_ids",
                        format!(
                            "order {order_id} is held by courier {}; reassign it first",
                            existing.courier_id
                        ),
                    ));
                }
                Some(existing) => existing.id,
                None => {
                    let created = create_delivery(tables, *order_id, courier.id, now)?;
                    events.push(DeliveryEvent::from_record(&created, now));
                    created.id
                }
            };
            tables.delivery_mut(delivery_id)?.route_id = Some(route_id);
            let order = tables.order_mut(*order_id)?;
            order.route_id = Some(route_id);
            order.assigned_courier = Some(courier.id);

            let stop = RouteStop {
                id: Uuid::new_v4(),
                route_id,
                order_id: *order_id,
                delivery_id: Some(delivery_id),
                sequence_number: position as u32 + 1,
                state: StopState::Pending,
                leg: *leg,
            };
            tables.route_stops.insert(stop.id, stop);
            promote_if_ready(tables, *order_id, now)?;
        }

        let route = Route {
            id: route_id,
            courier_id: courier.id,
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            capacity: request.capacity,
            stop_count: sequence.len() as u32,
            state: RouteState::Planned,
            created_by: actor.id,
            created_at: now,
            start_at: None,
            end_at: None,
        };
        tables.routes.insert(route.id, route.clone());

        Ok((route_view(tables, &route), events))
    })?;

    state.metrics.observe("create_route", started);
    state
        .metrics
        .route_events_total
        .with_label_values(&["created"])
        .inc();
    state.publish(events);
    info!(
        route_id = %view.route.id,
        courier_id = %view.route.courier_id,
        stops = view.stops.len(),
        "route created"
    );

    Ok(view)
}

pub fn get_route(state: &AppState, actor: &Actor, route_id: Uuid) -> Result<RouteView, AppError> {
    state.store.read(|tables| {
        let route = tables.route(route_id)?;
        ensure_may_act(actor, route)?;
        Ok(route_view(tables, route))
    })?
}

/// The courier's most recent open route.
pub fn active_route(state: &AppState, courier_id: Uuid) -> Result<Option<RouteView>, AppError> {
    state.store.read(|tables| {
        tables
            .routes
            .values()
            .filter(|r| r.courier_id == courier_id && r.state.is_open())
            .max_by_key(|r| r.created_at)
            .map(|route| route_view(tables, route))
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteFilter {
    pub state: Option<RouteState>,
    pub courier_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub fn list_routes(
    state: &AppState,
    actor: &Actor,
    filter: RouteFilter,
    page: PageRequest,
) -> Result<Page<Route>, AppError> {
    if !actor.is_elevated() {
        return Err(AppError::forbidden("listing routes requires an elevated role"));
    }

    let mut routes: Vec<Route> = state.store.read(|tables| {
        tables
            .routes
            .values()
            .filter(|r| filter.state.map_or(true, |s| r.state == s))
            .filter(|r| filter.courier_id.map_or(true, |id| r.courier_id == id))
            .filter(|r| filter.from.map_or(true, |from| r.created_at >= from))
            .filter(|r| filter.to.map_or(true, |to| r.created_at <= to))
            .cloned()
            .collect()
    })?;

    routes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Page::slice(routes, page))
}

fn deactivate_plans(tables: &mut Tables, route_id: Uuid) {
    for plan in tables
        .alternate_plans
        .values_mut()
        .filter(|p| p.route_id == route_id)
    {
        plan.active = false;
    }
}

/// Stores a new active ordering for the route's stops. The stops' own
/// sequence numbers stay untouched.
pub fn propose_alternate_order(
    state: &AppState,
    actor: &Actor,
    route_id: Uuid,
    new_sequence: Vec<Uuid>,
    reason: Option<String>,
) -> Result<AlternatePlanView, AppError> {
    let view = state.store.transaction(|tables| {
        let route = tables.route(route_id)?.clone();
        ensure_may_act(actor, &route)?;
        if !route.state.is_open() {
            return Err(state_conflict(&route, "be re-ordered"));
        }

        let current: HashSet<Uuid> = tables.stops_of(route_id).iter().map(|s| s.order_id).collect();
        let proposed: HashSet<Uuid> = new_sequence.iter().copied().collect();
        if proposed.len() != new_sequence.len() || proposed != current {
            return Err(AppError::invalid_field(
                ErrorCode::InvalidSequence,
                "new_sequence",
                "new_sequence must be a permutation of the route's current stops",
            ));
        }

        deactivate_plans(tables, route_id);

        let plan = AlternatePlan {
            id: Uuid::new_v4(),
            route_id,
            courier_id: route.courier_id,
            proposed_by: actor.id,
            reason: reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            active: true,
            created_at: Utc::now(),
        };
        tables.alternate_stops.extend(
            new_sequence
                .iter()
                .enumerate()
                .map(|(idx, order_id)| AlternateStop {
                    plan_id: plan.id,
                    order_id: *order_id,
                    position: idx as u32 + 1,
                }),
        );
        tables.alternate_plans.insert(plan.id, plan.clone());

        Ok(AlternatePlanView {
            id: plan.id,
            reason: plan.reason,
            active: plan.active,
            created_at: plan.created_at,
            sequence: tables.plan_sequence(plan.id),
        })
    })?;

    state
        .metrics
        .route_events_total
        .with_label_values(&["alternate_proposed"])
        .inc();
    info!(route_id = %route_id, plan_id = %view.id, "alternate route order proposed");

    Ok(view)
}

/// Switches an alternate plan on (turning any other off) or off.
pub fn toggle_alternate(
    state: &AppState,
    actor: &Actor,
    route_id: Uuid,
    plan_id: Uuid,
    active: bool,
) -> Result<RouteView, AppError> {
    let view = state.store.transaction(|tables| {
        let route = tables.route(route_id)?.clone();
        ensure_may_act(actor, &route)?;
        if !route.state.is_open() {
            return Err(state_conflict(&route, "be re-ordered"));
        }

        let belongs = tables
            .alternate_plans
            .get(&plan_id)
            .is_some_and(|p| p.route_id == route_id);
        if !belongs {
            return Err(AppError::not_found(
                ErrorCode::AlternatePlanNotFound,
                format!("alternate plan {plan_id} not found on route {route_id}"),
            ));
        }

        if active {
            deactivate_plans(tables, route_id);
        }
        if let Some(plan) = tables.alternate_plans.get_mut(&plan_id) {
            plan.active = active;
        }

        Ok(route_view(tables, &route))
    })?;

    info!(route_id = %route_id, plan_id = %plan_id, active, "alternate route order toggled");
    Ok(view)
}

/// Courier acknowledges a planned route.
pub fn accept_route(state: &AppState, actor: &Actor, route_id: Uuid) -> Result<RouteView, AppError> {
    let view = state.store.transaction(|tables| {
        let route = tables.route_mut(route_id)?;
        ensure_may_act(actor, route)?;
        if route.state != RouteState::Planned {
            return Err(state_conflict(route, "be accepted"));
        }
        route.state = RouteState::Active;
        let route = route.clone();
        Ok(route_view(tables, &route))
    })?;

    state
        .metrics
        .route_events_total
        .with_label_values(&["accepted"])
        .inc();
    info!(route_id = %route_id, "route accepted");
    Ok(view)
}

/// Puts the route in progress and starts every still-assigned delivery on it.
pub fn start_route(state: &AppState, actor: &Actor, route_id: Uuid) -> Result<RouteView, AppError> {
    let started = Instant::now();
    let now = Utc::now();
    let courier_id = state
        .store
        .read(|tables| tables.route(route_id).map(|r| r.courier_id))??;
    let departure = state.couriers.get(&courier_id).and_then(|c| c.last_position);

    let (view, events) = state.store.transaction(|tables| {
        let route = tables.route_mut(route_id)?;
        ensure_may_act(actor, route)?;
        if !route.state.can_start() {
            return Err(state_conflict(route, "start"));
        }
        route.state = RouteState::InProgress;
        route.start_at = Some(now);
        let route = route.clone();

        let to_start: Vec<Uuid> = tables
            .deliveries
            .values()
            .filter(|d| d.route_id == Some(route_id) && d.state == DeliveryState::Assigned)
            .map(|d| d.id)
            .collect();

        let mut events = Vec::with_capacity(to_start.len());
        for delivery_id in to_start {
            let record =
                deliveries::apply(tables, delivery_id, actor, Transition::Start { departure }, now)?;
            events.push(DeliveryEvent::from_record(&record, now));
        }
        for stop in tables
            .route_stops
            .values_mut()
            .filter(|s| s.route_id == route_id && s.state == StopState::Pending)
        {
            stop.state = StopState::EnRoute;
        }

        Ok((route_view(tables, &route), events))
    })?;

    state.metrics.observe("start_route", started);
    state
        .metrics
        .route_events_total
        .with_label_values(&["started"])
        .inc();
    state
        .metrics
        .delivery_transitions_total
        .with_label_values(&["start"])
        .inc_by(events.len() as u64);
    state.publish(events);
    info!(route_id = %route_id, "route started");

    Ok(view)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinishRouteRequest {
    #[serde(default)]
    pub delivered_order_ids: Vec<Uuid>,
    #[serde(default)]
    pub undelivered_order_ids: Vec<Uuid>,
}

/// Closes an in-progress route in one transaction. Delivered stops complete
/// their deliveries (stops already completed one by one are accepted as is).
/// Every other open stop releases its order back to the pool. Any failing
/// order aborts the whole batch.
pub fn finish_route(
    state: &AppState,
    actor: &Actor,
    route_id: Uuid,
    request: FinishRouteRequest,
) -> Result<RouteView, AppError> {
    let started = Instant::now();
    let now = Utc::now();

    let delivered: HashSet<Uuid> = request.delivered_order_ids.iter().copied().collect();
    if request
        .undelivered_order_ids
        .iter()
        .any(|id| delivered.contains(id))
    {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "undelivered_order_ids",
            "an order cannot be both delivered and undelivered",
        ));
    }

    let (view, events) = state.store.transaction(|tables| {
        let route = tables.route(route_id)?.clone();
        ensure_may_act(actor, &route)?;
        if route.state != RouteState::InProgress {
            return Err(state_conflict(&route, "finish"));
        }

        let stops = tables.stops_of(route_id);
        let stop_for = |order_id: &Uuid, field: &'static str| {
            stops
                .iter()
                .find(|s| s.order_id == *order_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::invalid_field(
                        ErrorCode::InvalidInput,
                        field,
                        format!("order {order_id} is not a stop of route {route_id}"),
                    )
                })
        };

        let mut events = Vec::new();

        for order_id in &request.delivered_order_ids {
            let stop = stop_for(order_id, "delivered_order_ids")?;
            let delivery_id = stop_delivery(&stop)?;
            if tables.delivery(delivery_id)?.state == DeliveryState::Delivered {
                if let Some(stop) = tables.route_stops.get_mut(&stop.id) {
                    stop.state = StopState::Delivered;
                }
                continue;
            }
            let record = deliveries::apply(
                tables,
                delivery_id,
                actor,
                Transition::Complete {
                    proof: DeliveryProof::default(),
                    distance: None,
                },
                now,
            )?;
            events.push(DeliveryEvent::from_record(&record, now));
        }

        for order_id in &request.undelivered_order_ids {
            let stop = stop_for(order_id, "undelivered_order_ids")?;
            let record = release_undelivered(tables, actor, &stop, now)?;
            events.push(DeliveryEvent::from_record(&record, now));
        }

        // Stops in neither list go back to the pool as well.
        let unlisted: Vec<RouteStop> = tables
            .stops_of(route_id)
            .into_iter()
            .filter(|s| s.state.is_open())
            .collect();
        for stop in &unlisted {
            let record = release_undelivered(tables, actor, stop, now)?;
            events.push(DeliveryEvent::from_record(&record, now));
        }
        if !unlisted.is_empty() {
            warn!(
                route_id = %route_id,
                released = unlisted.len(),
                "unlisted stops released as undelivered"
            );
        }

        let route = tables.route_mut(route_id)?;
        route.state = RouteState::Completed;
        route.end_at = Some(now);
        let route = route.clone();

        Ok((route_view(tables, &route), events))
    })?;

    state.metrics.observe("finish_route", started);
    state
        .metrics
        .route_events_total
        .with_label_values(&["finished"])
        .inc();
    state.publish(events);
    info!(
        route_id = %route_id,
        delivered = request.delivered_order_ids.len(),
        undelivered = request.undelivered_order_ids.len(),
        "route finished"
    );

    Ok(view)
}

fn release_undelivered(
    tables: &mut Tables,
    actor: &Actor,
    stop: &RouteStop,
    now: DateTime<Utc>,
) -> Result<DeliveryRecord, AppError> {
    let delivery_id = stop_delivery(stop)?;
    let record = deliveries::apply(
        tables,
        delivery_id,
        actor,
        Transition::Cancel {
            reason: UNDELIVERED_REASON.to_string(),
            detail: Some(format!("not delivered on route {}", stop.route_id)),
        },
        now,
    )?;

    if let Some(stop) = tables.route_stops.get_mut(&stop.id) {
        stop.state = StopState::Undelivered;
    }
    Ok(record)
}

fn stop_delivery(stop: &RouteStop) -> Result<Uuid, AppError> {
    stop.delivery_id.ok_or_else(|| {
        AppError::conflict(
            ErrorCode::InvalidDeliveryState,
            format!("stop for order {} has no delivery", stop.order_id),
        )
    })
}

/// Abandons a route that has not started. Deliveries stay with the courier
/// but leave the route.
pub fn cancel_route(state: &AppState, actor: &Actor, route_id: Uuid) -> Result<RouteView, AppError> {
    let now = Utc::now();

    let view = state.store.transaction(|tables| {
        let route = tables.route_mut(route_id)?;
        ensure_may_act(actor, route)?;
        if !route.state.can_start() {
            return Err(state_conflict(route, "be cancelled"));
        }
        route.state = RouteState::Cancelled;
        route.end_at = Some(now);
        let route = route.clone();

        for stop in tables
            .route_stops
            .values_mut()
            .filter(|s| s.route_id == route_id && s.state.is_open())
        {
            stop.state = StopState::Cancelled;
        }
        for delivery in tables
            .deliveries
            .values_mut()
            .filter(|d| d.route_id == Some(route_id))
        {
            delivery.route_id = None;
        }
        for order in tables
            .orders
            .values_mut()
            .filter(|o| o.route_id == Some(route_id))
        {
            order.route_id = None;
            order.updated_at = now;
        }
        deactivate_plans(tables, route_id);

        Ok(route_view(tables, &route))
    })?;

    state
        .metrics
        .route_events_total
        .with_label_values(&["cancelled"])
        .inc();
    info!(route_id = %route_id, "route cancelled");
    Ok(view)
}
