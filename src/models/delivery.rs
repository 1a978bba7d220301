use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::MeasurementSource;
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Assigned,
    InTransit,
    Arrived,
    Delivered,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEventKind {
    Start,
    Arrive,
    Complete,
    Cancel,
    Fail,
}

impl DeliveryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEventKind::Start => "start",
            DeliveryEventKind::Arrive => "arrive",
            DeliveryEventKind::Complete => "complete",
            DeliveryEventKind::Cancel => "cancel",
            DeliveryEventKind::Fail => "fail",
        }
    }
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered | DeliveryState::Cancelled | DeliveryState::Failed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Target state for `event`, or `None` when the transition is not allowed.
    pub fn next(&self, event: DeliveryEventKind) -> Option<DeliveryState> {
        use DeliveryEventKind as E;
        use DeliveryState as S;

        match (self, event) {
            (S::Assigned, E::Start) => Some(S::InTransit),
            (S::InTransit, E::Arrive) => Some(S::Arrived),
            (S::InTransit | S::Arrived, E::Complete) => Some(S::Delivered),
            (s, E::Cancel) if s.is_active() => Some(S::Cancelled),
            (s, E::Fail) if s.is_active() => Some(S::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Assigned => "assigned",
            DeliveryState::InTransit => "in_transit",
            DeliveryState::Arrived => "arrived",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Cancelled => "cancelled",
            DeliveryState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryProof {
    pub signature: Option<String>,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub detail: Option<String>,
    pub by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub route_id: Option<Uuid>,
    pub state: DeliveryState,
    pub assigned_at: DateTime<Utc>,
    pub departed_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub departure: Option<GeoPoint>,
    pub arrival: Option<GeoPoint>,
    pub proof: Option<DeliveryProof>,
    pub cancellation: Option<Cancellation>,
    pub distance_km: Option<f64>,
    pub distance_source: Option<MeasurementSource>,
    pub duration_minutes: Option<i64>,
}

impl DeliveryRecord {
    pub fn new(order_id: Uuid, courier_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            courier_id,
            route_id: None,
            state: DeliveryState::Assigned,
            assigned_at: now,
            departed_at: None,
            arrived_at: None,
            delivered_at: None,
            cancelled_at: None,
            departure: None,
            arrival: None,
            proof: None,
            cancellation: None,
            distance_km: None,
            distance_source: None,
            duration_minutes: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Broadcast after every committed delivery change.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEvent {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub route_id: Option<Uuid>,
    pub state: DeliveryState,
    pub at: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn from_record(record: &DeliveryRecord, at: DateTime<Utc>) -> Self {
        Self {
            delivery_id: record.id,
            order_id: record.order_id,
            courier_id: record.courier_id,
            route_id: record.route_id,
            state: record.state,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryEventKind as E;
    use super::DeliveryState as S;

    #[test]
    fn happy_path_follows_the_lifecycle() {
        assert_eq!(S::Assigned.next(E::Start), Some(S::InTransit));
        assert_eq!(S::InTransit.next(E::Arrive), Some(S::Arrived));
        assert_eq!(S::Arrived.next(E::Complete), Some(S::Delivered));
    }

    #[test]
    fn complete_is_allowed_without_arrival() {
        assert_eq!(S::InTransit.next(E::Complete), Some(S::Delivered));
        assert_eq!(S::Assigned.next(E::Complete), None);
    }

    #[test]
    fn cancel_and_fail_reach_from_every_non_terminal_state() {
        for state in [S::Assigned, S::InTransit, S::Arrived] {
            assert_eq!(state.next(E::Cancel), Some(S::Cancelled));
            assert_eq!(state.next(E::Fail), Some(S::Failed));
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [S::Delivered, S::Cancelled, S::Failed] {
            for event in [E::Start, E::Arrive, E::Complete, E::Cancel, E::Fail] {
                assert_eq!(state.next(event), None, "{state:?} accepted {event:?}");
            }
        }
    }

    #[test]
    fn arrive_only_from_in_transit() {
        assert_eq!(S::Assigned.next(E::Arrive), None);
        assert_eq!(S::Arrived.next(E::Arrive), None);
    }
}
