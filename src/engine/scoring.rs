use std::cmp::Ordering;

use crate::geo::haversine_km;
use crate::models::assignment::{CandidateCourier, ScoreBreakdown};
use crate::models::courier::{Courier, GeoPoint};
use crate::store::Tables;

const LOAD_WEIGHT: f64 = 0.60;
const PROXIMITY_WEIGHT: f64 = 0.40;

pub fn compute_score(
    courier: &Courier,
    in_flight: usize,
    ceiling: usize,
    destination: Option<&GeoPoint>,
) -> (f64, ScoreBreakdown, Option<f64>) {
    let distance_km = match (courier.last_position.as_ref(), destination) {
        (Some(from), Some(to)) => Some(haversine_km(from, to)),
        _ => None,
    };

    let breakdown = ScoreBreakdown {
        load_score: load_score(in_flight, ceiling),
        proximity_score: distance_km.map_or(0.0, proximity_score),
    };

    (weighted_score(&breakdown), breakdown, distance_km)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.load_score * LOAD_WEIGHT) + (breakdown.proximity_score * PROXIMITY_WEIGHT)
}

fn load_score(in_flight: usize, ceiling: usize) -> f64 {
    if ceiling == 0 {
        return 0.0;
    }

    let utilization = in_flight as f64 / ceiling as f64;
    (1.0 - utilization).clamp(0.0, 1.0)
}

fn proximity_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

/// Couriers below the in-flight ceiling, best first.
///
/// Ties on score go to the less loaded courier, then to the lower id.
pub fn rank_candidates(
    couriers: Vec<Courier>,
    tables: &Tables,
    ceiling: usize,
    destination: Option<&GeoPoint>,
) -> Vec<CandidateCourier> {
    let mut ranked: Vec<CandidateCourier> = couriers
        .into_iter()
        .filter_map(|courier| {
            let in_flight = tables.in_flight_count(courier.id);
            if in_flight >= ceiling {
                return None;
            }

            let (score, score_breakdown, distance_km) =
                compute_score(&courier, in_flight, ceiling, destination);
            Some(CandidateCourier {
                courier,
                in_flight,
                distance_km,
                score,
                score_breakdown,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.in_flight.cmp(&b.in_flight))
            .then_with(|| a.courier.id.cmp(&b.courier.id))
    });
    ranked
}
