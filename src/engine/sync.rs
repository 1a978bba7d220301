//! Gate for promoting an order to `in_process`.
//!
//! An order only shows as in process once the ledger knows both the customer
//! and the order, a courier holds an active delivery, and the parcel has been
//! staged on a vehicle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;
use crate::store::Tables;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    LedgerParty,
    LedgerOrder,
    CourierAssigned,
    Loaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreconditionReport {
    pub order_id: Uuid,
    pub satisfied: bool,
    pub ledger_party: bool,
    pub ledger_order: bool,
    pub courier_assigned: bool,
    pub loaded: bool,
    pub missing: Vec<Precondition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    #[serde(flatten)]
    pub report: PreconditionReport,
    pub status: OrderStatus,
    pub promoted: bool,
}

fn has_ref(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

pub fn check(tables: &Tables, order_id: Uuid) -> Result<PreconditionReport, AppError> {
    let order = tables.order(order_id)?;

    let ledger_party = has_ref(&order.ledger_party_ref);
    let ledger_order = has_ref(&order.ledger_order_ref);
    let courier_assigned = tables.active_delivery_for_order(order_id).is_some();
    let loaded = order.loaded_on_vehicle;

    let missing = [
        (ledger_party, Precondition::LedgerParty),
        (ledger_order, Precondition::LedgerOrder),
        (courier_assigned, Precondition::CourierAssigned),
        (loaded, Precondition::Loaded),
    ]
    .into_iter()
    .filter(|(held, _)| !held)
    .map(|(_, which)| which)
    .collect::<Vec<_>>();

    Ok(PreconditionReport {
        order_id,
        satisfied: missing.is_empty(),
        ledger_party,
        ledger_order,
        courier_assigned,
        loaded,
        missing,
    })
}

/// Re-evaluates the gate and moves a `confirmed` order to `in_process` when
/// every precondition holds. Must run inside a transaction.
pub(crate) fn promote_if_ready(
    tables: &mut Tables,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, AppError> {
    let report = check(tables, order_id)?;
    let order = tables.order_mut(order_id)?;

    let promoted = report.satisfied && order.status == OrderStatus::Confirmed;
    if promoted {
        order.set_status(OrderStatus::InProcess, now);
        info!(order_id = %order_id, "order promoted to in_process");
    }

    Ok(SyncOutcome {
        report,
        status: order.status,
        promoted,
    })
}

pub fn check_preconditions(state: &AppState, order_id: Uuid) -> Result<PreconditionReport, AppError> {
    state.store.read(|tables| check(tables, order_id))?
}

pub fn recheck(state: &AppState, order_id: Uuid) -> Result<SyncOutcome, AppError> {
    state
        .store
        .transaction(|tables| promote_if_ready(tables, order_id, Utc::now()))
}

/// Staff or the courier holding the order may change its staging flag.
fn ensure_may_stage(actor: &Actor, order: &Order) -> Result<(), AppError> {
    let holder = order.assigned_courier.is_some_and(|id| id == actor.id);
    if actor.is_elevated() || holder {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "order {} is not held by the caller",
            order.id
        )))
    }
}

pub fn mark_loaded(state: &AppState, actor: &Actor, order_id: Uuid) -> Result<SyncOutcome, AppError> {
    state.store.transaction(|tables| {
        let now = Utc::now();
        let order = tables.order_mut(order_id)?;
        ensure_may_stage(actor, order)?;
        if !order.loaded_on_vehicle {
            order.loaded_on_vehicle = true;
            order.updated_at = now;
            info!(order_id = %order_id, "order marked loaded");
        }
        promote_if_ready(tables, order_id, now)
    })
}

/// Clears the staging flag. Never demotes an already promoted order.
pub fn clear_loaded(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
) -> Result<PreconditionReport, AppError> {
    state.store.transaction(|tables| {
        let order = tables.order_mut(order_id)?;
        ensure_may_stage(actor, order)?;
        if order.loaded_on_vehicle {
            order.loaded_on_vehicle = false;
            order.updated_at = Utc::now();
            info!(order_id = %order_id, "order unloaded");
        }
        check(tables, order_id)
    })
}

/// Applied by the ledger bridge when it creates (or drops) its records.
pub fn update_ledger_refs(
    state: &AppState,
    order_id: Uuid,
    party_ref: Option<String>,
    order_ref: Option<String>,
) -> Result<SyncOutcome, AppError> {
    state.store.transaction(|tables| {
        let now = Utc::now();
        let order = tables.order_mut(order_id)?;
        order.ledger_party_ref = party_ref;
        order.ledger_order_ref = order_ref;
        order.updated_at = now;
        promote_if_ready(tables, order_id, now)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::delivery::DeliveryRecord;

    fn confirmed_order(id: Uuid) -> Order {
        let now = Utc::now();
        Order {
            id,
            status: OrderStatus::Confirmed,
            destination: None,
            destination_address: None,
            loaded_on_vehicle: false,
            ledger_party_ref: None,
            ledger_order_ref: None,
            assigned_courier: None,
            route_id: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reports_every_missing_precondition() {
        let mut tables = Tables::default();
        let id = Uuid::from_u128(1);
        tables.orders.insert(id, confirmed_order(id));

        let report = check(&tables, id).unwrap();
        assert!(!report.satisfied);
        assert_eq!(report.missing.len(), 4);
    }

    #[test]
    fn promotes_only_when_all_four_hold() {
        let mut tables = Tables::default();
        let id = Uuid::from_u128(1);
        let mut order = confirmed_order(id);
        order.ledger_party_ref = Some("C-1".to_string());
        order.ledger_order_ref = Some("SO-1".to_string());
        order.loaded_on_vehicle = true;
        tables.orders.insert(id, order);

        let outcome = promote_if_ready(&mut tables, id, Utc::now()).unwrap();
        assert!(!outcome.promoted);
        assert_eq!(outcome.report.missing, vec![Precondition::CourierAssigned]);
        assert_eq!(tables.orders[&id].status, OrderStatus::Confirmed);

        let delivery = DeliveryRecord::new(id, Uuid::from_u128(9), Utc::now());
        tables.deliveries.insert(delivery.id, delivery);

        let outcome = promote_if_ready(&mut tables, id, Utc::now()).unwrap();
        assert!(outcome.promoted);
        assert_eq!(tables.orders[&id].status, OrderStatus::InProcess);
    }

    #[test]
    fn blank_ledger_refs_do_not_count() {
        let mut tables = Tables::default();
        let id = Uuid::from_u128(1);
        let mut order = confirmed_order(id);
        order.ledger_party_ref = Some("   ".to_string());
        tables.orders.insert(id, order);

        let report = check(&tables, id).unwrap();
        assert!(!report.ledger_party);
    }
}
