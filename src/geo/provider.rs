//! Mapping-provider seam.
//!
//! Adapters translate one vendor's HTTP API into these shapes; nothing past
//! the [`GeoService`](super::GeoService) sees vendor payloads or errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::courier::GeoPoint;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    Provider(String),

    #[error("provider response missing {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_km: f64,
    pub duration_minutes: f64,
}

/// Driving route as measured by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteSummary {
    pub distance_km: f64,
    pub duration_minutes: f64,
    /// Encoded polyline, passed through as the provider returned it.
    pub polyline: Option<String>,
    pub steps: Vec<RouteStep>,
}

/// `Ok(None)` means the provider answered but found nothing.
#[async_trait]
pub trait MapProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GeoError>;

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>, GeoError>;

    async fn directions(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        waypoints: &[GeoPoint],
    ) -> Result<Option<RouteSummary>, GeoError>;
}
