use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    InProcess,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Statuses from which an order may be bundled into a route.
    pub fn is_routable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::InProcess
                | OrderStatus::Shipped
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub destination: Option<GeoPoint>,
    pub destination_address: Option<String>,
    pub loaded_on_vehicle: bool,
    pub ledger_party_ref: Option<String>,
    pub ledger_order_ref: Option<String>,
    /// Logistics projection: who currently holds the order and in which route.
    pub assigned_courier: Option<Uuid>,
    pub route_id: Option<Uuid>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn set_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn clear_logistics(&mut self, now: DateTime<Utc>) {
        self.assigned_courier = None;
        self.route_id = None;
        self.updated_at = now;
    }
}
