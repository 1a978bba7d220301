//! In-process relational store.
//!
//! Writers go through [`Store::transaction`], which works on a copy of the
//! tables and swaps it in only when the closure succeeds and every table
//! constraint holds. A failed transaction leaves no trace.
//!
//! This stands in for a relational database: each write clones the tables and
//! re-checks every constraint in one linear pass, so write cost grows with the
//! retained history. A deployment keeping long history should back
//! [`Store`] with a database and enforce these constraints there.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};
use crate::models::delivery::DeliveryRecord;
use crate::models::order::Order;
use crate::models::route::{AlternatePlan, AlternateStop, Route, RouteStop, SequenceEntry};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub orders: HashMap<Uuid, Order>,
    pub deliveries: HashMap<Uuid, DeliveryRecord>,
    pub routes: HashMap<Uuid, Route>,
    pub route_stops: HashMap<Uuid, RouteStop>,
    pub alternate_plans: HashMap<Uuid, AlternatePlan>,
    pub alternate_stops: Vec<AlternateStop>,
}

fn missing(code: ErrorCode, kind: &str, id: Uuid) -> AppError {
    AppError::not_found(code, format!("{kind} {id} not found"))
}

impl Tables {
    pub fn order(&self, id: Uuid) -> Result<&Order, AppError> {
        self.orders
            .get(&id)
            .ok_or_else(|| missing(ErrorCode::OrderNotFound, "order", id))
    }

    pub fn order_mut(&mut self, id: Uuid) -> Result<&mut Order, AppError> {
        self.orders
            .get_mut(&id)
            .ok_or_else(|| missing(ErrorCode::OrderNotFound, "order", id))
    }

    pub fn delivery(&self, id: Uuid) -> Result<&DeliveryRecord, AppError> {
        self.deliveries
            .get(&id)
            .ok_or_else(|| missing(ErrorCode::DeliveryNotFound, "delivery", id))
    }

    pub fn delivery_mut(&mut self, id: Uuid) -> Result<&mut DeliveryRecord, AppError> {
        self.deliveries
            .get_mut(&id)
            .ok_or_else(|| missing(ErrorCode::DeliveryNotFound, "delivery", id))
    }

    pub fn route(&self, id: Uuid) -> Result<&Route, AppError> {
        self.routes
            .get(&id)
            .ok_or_else(|| missing(ErrorCode::RouteNotFound, "route", id))
    }

    pub fn route_mut(&mut self, id: Uuid) -> Result<&mut Route, AppError> {
        self.routes
            .get_mut(&id)
            .ok_or_else(|| missing(ErrorCode::RouteNotFound, "route", id))
    }

    pub fn active_delivery_for_order(&self, order_id: Uuid) -> Option<&DeliveryRecord> {
        self.deliveries
            .values()
            .find(|d| d.order_id == order_id && d.is_active())
    }

    pub fn in_flight_count(&self, courier_id: Uuid) -> usize {
        self.deliveries
            .values()
            .filter(|d| d.courier_id == courier_id && d.is_active())
            .count()
    }

    /// Stops of a route ordered by their stored sequence number.
    pub fn stops_of(&self, route_id: Uuid) -> Vec<RouteStop> {
        let mut stops: Vec<RouteStop> = self
            .route_stops
            .values()
            .filter(|s| s.route_id == route_id)
            .cloned()
            .collect();
        stops.sort_by_key(|s| s.sequence_number);
        stops
    }

    pub fn stop_for_order_mut(&mut self, route_id: Uuid, order_id: Uuid) -> Option<&mut RouteStop> {
        self.route_stops
            .values_mut()
            .find(|s| s.route_id == route_id && s.order_id == order_id)
    }

    /// The open route in which `order_id` is still an open stop, if any.
    pub fn open_route_for_order(&self, order_id: Uuid) -> Option<Uuid> {
        self.route_stops
            .values()
            .filter(|s| s.order_id == order_id && s.state.is_open())
            .find(|s| {
                self.routes
                    .get(&s.route_id)
                    .is_some_and(|r| r.state.is_open())
            })
            .map(|s| s.route_id)
    }

    pub fn active_plan(&self, route_id: Uuid) -> Option<&AlternatePlan> {
        self.alternate_plans
            .values()
            .find(|p| p.route_id == route_id && p.active)
    }

    pub fn plan_sequence(&self, plan_id: Uuid) -> Vec<SequenceEntry> {
        let mut rows: Vec<SequenceEntry> = self
            .alternate_stops
            .iter()
            .filter(|row| row.plan_id == plan_id)
            .map(|row| SequenceEntry {
                order_id: row.order_id,
                sequence_number: row.position,
            })
            .collect();
        rows.sort_by_key(|row| row.sequence_number);
        rows
    }

    pub fn check_constraints(&self) -> Result<(), AppError> {
        let mut active_orders = HashSet::new();
        for delivery in self.deliveries.values().filter(|d| d.is_active()) {
            if !active_orders.insert(delivery.order_id) {
                return Err(violation(format!(
                    "order {} has more than one active delivery",
                    delivery.order_id
                )));
            }
        }

        let mut routes_with_active_plan = HashSet::new();
        for plan in self.alternate_plans.values().filter(|p| p.active) {
            if !routes_with_active_plan.insert(plan.route_id) {
                return Err(violation(format!(
                    "route {} has more than one active alternate plan",
                    plan.route_id
                )));
            }
        }

        let mut stops_by_route: HashMap<Uuid, Vec<&RouteStop>> = HashMap::new();
        for stop in self.route_stops.values() {
            stops_by_route.entry(stop.route_id).or_default().push(stop);
        }
        let mut rows_by_plan: HashMap<Uuid, Vec<&AlternateStop>> = HashMap::new();
        for row in &self.alternate_stops {
            rows_by_plan.entry(row.plan_id).or_default().push(row);
        }
        let mut plans_by_route: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for plan in self.alternate_plans.values() {
            plans_by_route.entry(plan.route_id).or_default().push(plan.id);
        }

        let mut open_stop_orders = HashSet::new();
        for route in self.routes.values() {
            let stops = stops_by_route.get(&route.id).map(Vec::as_slice).unwrap_or_default();
            let sequence: Vec<u32> = stops.iter().map(|s| s.sequence_number).collect();
            if !is_contiguous(&sequence) {
                return Err(violation(format!(
                    "route {} stop sequence is not 1..{}",
                    route.id,
                    stops.len()
                )));
            }

            if route.state.is_open() {
                for stop in stops.iter().filter(|s| s.state.is_open()) {
                    if !open_stop_orders.insert(stop.order_id) {
                        return Err(violation(format!(
                            "order {} is an open stop in more than one route",
                            stop.order_id
                        )));
                    }
                }
            }

            let route_orders: HashSet<Uuid> = stops.iter().map(|s| s.order_id).collect();
            for plan_id in plans_by_route.get(&route.id).into_iter().flatten() {
                let rows = rows_by_plan.get(plan_id).map(Vec::as_slice).unwrap_or_default();
                let positions: Vec<u32> = rows.iter().map(|r| r.position).collect();
                let plan_orders: HashSet<Uuid> = rows.iter().map(|r| r.order_id).collect();
                if !is_contiguous(&positions)
                    || plan_orders.len() != rows.len()
                    || plan_orders != route_orders
                {
                    return Err(violation(format!(
                        "alternate plan {} is not a permutation of route {} stops",
                        plan_id, route.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn violation(message: String) -> AppError {
    warn!(%message, "constraint violation, rolling back");
    AppError::conflict(ErrorCode::ConstraintViolation, message)
}

/// `values` sorted ascending equals 1..=len.
fn is_contiguous(values: &[u32]) -> bool {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(idx, v)| *v as usize == idx + 1)
}

#[derive(Debug, Default)]
pub struct Store {
    tables: Mutex<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("store lock poisoned".to_string()))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, AppError> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Runs `f` atomically. Writers are serialized; on any error, including a
    /// constraint violation detected at commit, the tables are left untouched.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut guard = self.lock()?;
        let mut working = guard.clone();

        let output = f(&mut working)?;
        working.check_constraints()?;

        *guard = working;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::delivery::DeliveryRecord;
    use crate::models::order::OrderStatus;
    use crate::models::route::{RouteState, StopState};

    fn order(id: Uuid) -> Order {
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
    fn failed_closure_rolls_back() {
        let store = Store::new();
        let id = Uuid::from_u128(1);

        let result: Result<(), AppError> = store.transaction(|tables| {
            tables.orders.insert(id, order(id));
            Err(AppError::Internal("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.read(|t| t.orders.len()).unwrap(), 0);
    }

    #[test]
    fn second_active_delivery_for_order_is_rejected_at_commit() {
        let store = Store::new();
        let order_id = Uuid::from_u128(1);

        store
            .transaction(|tables| {
                tables.orders.insert(order_id, order(order_id));
                let first = DeliveryRecord::new(order_id, Uuid::from_u128(10), Utc::now());
                tables.deliveries.insert(first.id, first);
                Ok(())
            })
            .unwrap();

        let err = store
            .transaction(|tables| {
                let second = DeliveryRecord::new(order_id, Uuid::from_u128(11), Utc::now());
                tables.deliveries.insert(second.id, second);
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ConstraintViolation);
        assert_eq!(store.read(|t| t.deliveries.len()).unwrap(), 1);
    }

    fn route_with_stop(tables: &mut Tables, route_id: Uuid, order_id: Uuid, sequence_number: u32) {
        tables.routes.insert(
            route_id,
            Route {
                id: route_id,
                courier_id: Uuid::from_u128(10),
                name: "run".to_string(),
                description: None,
                capacity: 5,
                stop_count: 1,
                state: RouteState::Planned,
                created_by: Uuid::from_u128(99),
                created_at: Utc::now(),
                start_at: None,
                end_at: None,
            },
        );
        let stop = RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id,
            delivery_id: None,
            sequence_number,
            state: StopState::Pending,
            leg: None,
        };
        tables.route_stops.insert(stop.id, stop);
    }

    #[test]
    fn route_level_constraints_are_checked_per_route() {
        let order_id = Uuid::from_u128(1);

        let mut tables = Tables::default();
        route_with_stop(&mut tables, Uuid::from_u128(20), order_id, 1);
        route_with_stop(&mut tables, Uuid::from_u128(21), Uuid::from_u128(2), 1);
        assert!(tables.check_constraints().is_ok());

        route_with_stop(&mut tables, Uuid::from_u128(22), order_id, 1);
        assert!(tables.check_constraints().is_err());

        let mut gapped = Tables::default();
        route_with_stop(&mut gapped, Uuid::from_u128(20), order_id, 2);
        assert!(gapped.check_constraints().is_err());
    }

    #[test]
    fn contiguity_check() {
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[2, 1, 3]));
        assert!(!is_contiguous(&[1, 3]));
        assert!(!is_contiguous(&[1, 1, 2]));
    }
}
