use serde::Serialize;
use uuid::Uuid;

use crate::models::courier::Courier;
use crate::models::delivery::DeliveryRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub load_score: f64,
    pub proximity_score: f64,
}

/// A courier considered for an order, with the numbers that ranked it.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateCourier {
    pub courier: Courier,
    pub in_flight: usize,
    pub distance_km: Option<f64>,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentOutcome {
    pub delivery: DeliveryRecord,
    pub already_assigned: bool,
    pub replaced_delivery_id: Option<Uuid>,
    pub promoted_to_in_process: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReassignmentOutcome {
    pub cancelled: DeliveryRecord,
    pub replacement: Option<DeliveryRecord>,
    pub reassigned: bool,
    /// Set when no courier could take over; the order is back in the pool.
    pub caveat: Option<String>,
}
