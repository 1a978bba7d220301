//! Order intake and status updates coming from order management.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::sync::promote_if_ready;
use crate::error::{AppError, ErrorCode};
use crate::models::actor::Actor;
use crate::models::courier::GeoPoint;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub destination: Option<GeoPoint>,
    pub address: Option<String>,
    pub ledger_party_ref: Option<String>,
    pub ledger_order_ref: Option<String>,
}

/// Stores a new order. An address without coordinates is geocoded first; a
/// miss leaves the destination empty rather than rejecting the order.
pub async fn intake(state: &AppState, request: CreateOrderRequest) -> Result<Order, AppError> {
    if let Some(point) = &request.destination {
        if !point.is_valid() {
            return Err(AppError::invalid_field(
                ErrorCode::InvalidInput,
                "destination",
                "coordinates are out of range",
            ));
        }
    }

    let address = request
        .address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    let destination = match (request.destination, address.as_deref()) {
        (Some(point), _) => Some(point),
        (None, Some(address)) => {
            let found = state.geo.geocode(address).await;
            if found.is_none() {
                warn!(address = %address, "order stored without coordinates");
            }
            found
        }
        (None, None) => None,
    };

    let status = request.status.unwrap_or(OrderStatus::Pending);
    if !matches!(status, OrderStatus::Pending | OrderStatus::Confirmed) {
        return Err(AppError::invalid_field(
            ErrorCode::InvalidInput,
            "status",
            "new orders start as pending or confirmed",
        ));
    }

    let now = Utc::now();
    let order = Order {
        id: request.id.unwrap_or_else(Uuid::new_v4),
        status,
        destination,
        destination_address: address,
        loaded_on_vehicle: false,
        ledger_party_ref: request.ledger_party_ref,
        ledger_order_ref: request.ledger_order_ref,
        assigned_courier: None,
        route_id: None,
        delivered_at: None,
        created_at: now,
        updated_at: now,
    };

    let stored = state.store.transaction(|tables| {
        if tables.orders.contains_key(&order.id) {
            return Err(AppError::conflict(
                ErrorCode::InvalidInput,
                format!("order {} already exists", order.id),
            ));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    })?;

    info!(order_id = %stored.id, status = ?stored.status, "order received");
    Ok(stored)
}

pub fn get_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state.store.read(|tables| tables.order(order_id).cloned())?
}

/// Confirmation, cancellation and refunds from order management.
///
/// Dispatch owns `in_process`, `shipped` and `delivered`; those cannot be set
/// from outside. Cancelling an order a courier still holds is a conflict.
pub fn update_status(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
    target: OrderStatus,
) -> Result<Order, AppError> {
    if !actor.is_elevated() {
        return Err(AppError::forbidden("changing order status requires an elevated role"));
    }

    let order = state.store.transaction(|tables| {
        let now = Utc::now();
        let current = tables.order(order_id)?.status;
        let held = tables.active_delivery_for_order(order_id).is_some();

        let allowed = match (current, target) {
            (from, to) if from == to => true,
            (OrderStatus::Pending, OrderStatus::Confirmed) => true,
            (from, OrderStatus::Cancelled) => !from.is_terminal() && !held,
            (OrderStatus::Delivered | OrderStatus::Cancelled, OrderStatus::Refunded) => true,
            _ => false,
        };
        if !allowed {
            return Err(AppError::conflict(
                ErrorCode::InvalidOrderState,
                format!("order {order_id} cannot move from {current:?} to {target:?}"),
            ));
        }

        tables.order_mut(order_id)?.set_status(target, now);
        if target == OrderStatus::Confirmed {
            promote_if_ready(tables, order_id, now)?;
        }
        tables.order(order_id).cloned()
    })?;

    info!(order_id = %order_id, status = ?order.status, "order status updated");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchSettings;
    use crate::geo::GeoService;
    use crate::models::actor::Role;

    fn state() -> AppState {
        AppState::new(DispatchSettings::default(), GeoService::disabled(40.0), 16)
    }

    fn admin() -> Actor {
        Actor {
            id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    fn request(address: Option<&str>) -> CreateOrderRequest {
        CreateOrderRequest {
            id: None,
            status: None,
            destination: None,
            address: address.map(str::to_string),
            ledger_party_ref: None,
            ledger_order_ref: None,
        }
    }

    #[tokio::test]
    async fn unresolved_address_keeps_the_order() {
        let state = state();
        let order = intake(&state, request(Some("Calle Falsa 123"))).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.destination.is_none());
        assert_eq!(order.destination_address.as_deref(), Some("Calle Falsa 123"));
    }

    #[tokio::test]
    async fn confirm_then_cancel() {
        let state = state();
        let order = intake(&state, request(None)).await.unwrap();

        let confirmed = update_status(&state, &admin(), order.id, OrderStatus::Confirmed).unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        let cancelled = update_status(&state, &admin(), order.id, OrderStatus::Cancelled).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = update_status(&state, &admin(), order.id, OrderStatus::Confirmed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOrderState);
    }

    #[tokio::test]
    async fn dispatch_statuses_cannot_be_set_from_outside() {
        let state = state();
        let order = intake(&state, request(None)).await.unwrap();

        let err = update_status(&state, &admin(), order.id, OrderStatus::Shipped).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOrderState);
    }
}
