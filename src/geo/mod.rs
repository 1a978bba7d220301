pub mod google;
pub mod osrm;
pub mod provider;

use std::sync::Arc;

use prometheus::IntCounterVec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, MapProviderKind};
use crate::error::AppError;
use crate::geo::google::{GoogleConfig, GoogleMapsProvider};
use crate::geo::osrm::{OsrmConfig, OsrmProvider};
use crate::geo::provider::{MapProvider, RouteSummary};
use crate::models::courier::GeoPoint;
use crate::models::route::Leg;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lon = (delta_lon / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Where a distance or duration figure came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    Provider,
    /// Great-circle distance at an assumed average speed.
    Approximate,
}

/// Greedy nearest-neighbor visiting order over `points`, starting at `origin`.
///
/// Returns indices into `points`. Ties keep the earlier index, so the result
/// depends only on the inputs.
pub fn nearest_neighbor_sequence(origin: &GeoPoint, points: &[GeoPoint]) -> Vec<usize> {
    let mut visited = vec![false; points.len()];
    let mut order = Vec::with_capacity(points.len());
    let mut current = *origin;

    for _ in 0..points.len() {
        let mut best: Option<(usize, f64)> = None;
        for (idx, point) in points.iter().enumerate() {
            if visited[idx] {
                continue;
            }
            let km = haversine_km(&current, point);
            if best.map_or(true, |(_, best_km)| km < best_km) {
                best = Some((idx, km));
            }
        }

        let Some((idx, _)) = best else { break };
        visited[idx] = true;
        order.push(idx);
        current = points[idx];
    }

    order
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderedStop {
    pub id: Uuid,
    pub point: GeoPoint,
    pub leg: Leg,
}

/// Stateless facade over the configured mapping provider.
///
/// Provider failures never escape: they are logged and come back as `None`
/// (or as an approximate estimate where one can be computed).
#[derive(Clone)]
pub struct GeoService {
    provider: Option<Arc<dyn MapProvider>>,
    fallback_speed_kmh: f64,
    fallbacks: Option<IntCounterVec>,
}

impl GeoService {
    pub fn new(provider: Arc<dyn MapProvider>, fallback_speed_kmh: f64) -> Self {
        Self {
            provider: Some(provider),
            fallback_speed_kmh,
            fallbacks: None,
        }
    }

    pub fn disabled(fallback_speed_kmh: f64) -> Self {
        Self {
            provider: None,
            fallback_speed_kmh,
            fallbacks: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let provider: Arc<dyn MapProvider> = match config.map_provider {
            MapProviderKind::None => return Ok(Self::disabled(config.fallback_speed_kmh)),
            MapProviderKind::Osrm => Arc::new(
                OsrmProvider::new(OsrmConfig {
                    osrm_url: config.osrm_url.clone(),
                    nominatim_url: config.nominatim_url.clone(),
                    timeout_secs: config.geo_timeout_secs,
                    ..OsrmConfig::default()
                })
                .map_err(|err| AppError::Internal(format!("osrm client: {err}")))?,
            ),
            MapProviderKind::Google => {
                let api_key = config.google_maps_api_key.clone().ok_or_else(|| {
                    AppError::Internal("GOOGLE_MAPS_API_KEY is required for google".to_string())
                })?;
                Arc::new(
                    GoogleMapsProvider::new(GoogleConfig {
                        base_url: config.google_maps_url.clone(),
                        api_key,
                        timeout_secs: config.geo_timeout_secs,
                    })
                    .map_err(|err| AppError::Internal(format!("google client: {err}")))?,
                )
            }
        };

        Ok(Self::new(provider, config.fallback_speed_kmh))
    }

    pub fn with_fallback_counter(mut self, counter: IntCounterVec) -> Self {
        self.fallbacks = Some(counter);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.as_ref().map_or("none", |p| p.name())
    }

    fn degraded(&self, operation: &str) {
        if let Some(counter) = &self.fallbacks {
            counter.with_label_values(&[operation]).inc();
        }
    }

    pub async fn geocode(&self, address: &str) -> Option<GeoPoint> {
        let provider = self.provider.as_ref()?;
        match provider.geocode(address).await {
            Ok(found) => found,
            Err(err) => {
                warn!(provider = provider.name(), error = %err, "geocode failed");
                self.degraded("geocode");
                None
            }
        }
    }

    pub async fn reverse_geocode(&self, point: GeoPoint) -> Option<String> {
        let provider = self.provider.as_ref()?;
        match provider.reverse_geocode(point).await {
            Ok(found) => found,
            Err(err) => {
                warn!(provider = provider.name(), error = %err, "reverse geocode failed");
                self.degraded("reverse_geocode");
                None
            }
        }
    }

    pub async fn compute_route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        waypoints: &[GeoPoint],
    ) -> Option<RouteSummary> {
        let provider = self.provider.as_ref()?;
        match provider.directions(origin, destination, waypoints).await {
            Ok(found) => found,
            Err(err) => {
                warn!(provider = provider.name(), error = %err, "directions failed");
                self.degraded("directions");
                None
            }
        }
    }

    /// Straight-line estimate, labelled as approximate.
    pub fn estimate(&self, from: &GeoPoint, to: &GeoPoint) -> Leg {
        let km = haversine_km(from, to);
        let minutes = if self.fallback_speed_kmh > 0.0 {
            km / self.fallback_speed_kmh * 60.0
        } else {
            0.0
        };

        Leg {
            distance_km: km,
            duration_minutes: minutes,
            source: MeasurementSource::Approximate,
        }
    }

    /// Provider distance when available, estimate otherwise.
    pub async fn measure(&self, from: GeoPoint, to: GeoPoint) -> Leg {
        match self.compute_route(from, to, &[]).await {
            Some(route) => Leg {
                distance_km: route.distance_km,
                duration_minutes: route.duration_minutes,
                source: MeasurementSource::Provider,
            },
            None => {
                debug!("falling back to haversine estimate");
                self.estimate(&from, &to)
            }
        }
    }

    /// Orders `destinations` greedily by great-circle proximity and attaches
    /// per-leg metrics.
    pub async fn nearest_neighbor_order(
        &self,
        origin: GeoPoint,
        destinations: &[(Uuid, GeoPoint)],
    ) -> Vec<OrderedStop> {
        let points: Vec<GeoPoint> = destinations.iter().map(|(_, p)| *p).collect();
        let sequence = nearest_neighbor_sequence(&origin, &points);

        let mut ordered = Vec::with_capacity(sequence.len());
        let mut current = origin;
        for idx in sequence {
            let (id, point) = destinations[idx];
            let leg = self.measure(current, point).await;
            ordered.push(OrderedStop { id, point, leg });
            current = point;
        }

        ordered
    }
}
