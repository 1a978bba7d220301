use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::MeasurementSource;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Planned,
    Active,
    InProgress,
    Completed,
    Cancelled,
}

impl RouteState {
    /// Open routes still hold their stops and may be re-ordered.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            RouteState::Planned | RouteState::Active | RouteState::InProgress
        )
    }

    pub fn can_start(&self) -> bool {
        matches!(self, RouteState::Planned | RouteState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteState::Planned => "planned",
            RouteState::Active => "active",
            RouteState::InProgress => "in_progress",
            RouteState::Completed => "completed",
            RouteState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    Pending,
    EnRoute,
    Delivered,
    Undelivered,
    Cancelled,
}

impl StopState {
    pub fn is_open(&self) -> bool {
        matches!(self, StopState::Pending | StopState::EnRoute)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub capacity: u32,
    pub stop_count: u32,
    pub state: RouteState,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Travel estimate for the leg that ends at a stop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Leg {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub source: MeasurementSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub id: Uuid,
    pub route_id: Uuid,
    pub order_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub sequence_number: u32,
    pub state: StopState,
    pub leg: Option<Leg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternatePlan {
    pub id: Uuid,
    pub route_id: Uuid,
    pub courier_id: Uuid,
    pub proposed_by: Uuid,
    pub reason: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One row of an alternate plan's proposed ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateStop {
    pub plan_id: Uuid,
    pub order_id: Uuid,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub order_id: Uuid,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternatePlanView {
    pub id: Uuid,
    pub reason: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub sequence: Vec<SequenceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    #[serde(flatten)]
    pub route: Route,
    pub stops: Vec<RouteStop>,
    pub alternate: Option<AlternatePlanView>,
    /// Stop order the courier should follow right now.
    pub effective_order: Vec<Uuid>,
}
