//! Google Maps Platform: Geocoding and Directions web services.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::geo::provider::{GeoError, MapProvider, RouteStep, RouteSummary};
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GoogleMapsProvider {
    config: GoogleConfig,
    client: reqwest::Client,
}

impl GoogleMapsProvider {
    pub fn new(config: GoogleConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    async fn geocode_query(&self, query: &[(&str, &str)]) -> Result<GeocodeResponse, GeoError> {
        let url = format!("{}/maps/api/geocode/json", self.config.base_url);
        let body: GeocodeResponse = self
            .client
            .get(url)
            .query(query)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body)
    }
}

fn latlng(point: &GeoPoint) -> String {
    format!("{:.6},{:.6}", point.lat, point.lon)
}

/// `ZERO_RESULTS` is an empty answer; every other non-OK status is a failure.
fn check_status(status: &str) -> Result<bool, GeoError> {
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" | "NOT_FOUND" => Ok(false),
        other => Err(GeoError::Provider(other.to_string())),
    }
}

#[async_trait]
impl MapProvider for GoogleMapsProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GeoError> {
        let body = self.geocode_query(&[("address", address)]).await?;
        if !check_status(&body.status)? {
            return Ok(None);
        }

        Ok(body.results.into_iter().next().map(|hit| GeoPoint {
            lat: hit.geometry.location.lat,
            lon: hit.geometry.location.lng,
        }))
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>, GeoError> {
        let coords = latlng(&point);
        let body = self.geocode_query(&[("latlng", coords.as_str())]).await?;
        if !check_status(&body.status)? {
            return Ok(None);
        }

        Ok(body
            .results
            .into_iter()
            .next()
            .and_then(|hit| hit.formatted_address))
    }

    async fn directions(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        waypoints: &[GeoPoint],
    ) -> Result<Option<RouteSummary>, GeoError> {
        let url = format!("{}/maps/api/directions/json", self.config.base_url);
        let origin = latlng(&origin);
        let destination = latlng(&destination);
        let waypoints = waypoints.iter().map(latlng).collect::<Vec<_>>().join("|");

        let mut query = vec![
            ("origin", origin.as_str()),
            ("destination", destination.as_str()),
            ("mode", "driving"),
            ("key", self.config.api_key.as_str()),
        ];
        if !waypoints.is_empty() {
            query.push(("waypoints", waypoints.as_str()));
        }

        let body: DirectionsResponse = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !check_status(&body.status)? {
            return Ok(None);
        }

        let Some(route) = body.routes.into_iter().next() else {
            return Ok(None);
        };

        let mut meters = 0.0;
        let mut seconds = 0.0;
        let mut steps = Vec::new();
        for leg in route.legs {
            meters += leg.distance.value;
            seconds += leg.duration.value;
            steps.extend(leg.steps.into_iter().map(|step| RouteStep {
                instruction: step.html_instructions.unwrap_or_default(),
                distance_km: step.distance.value / 1000.0,
                duration_minutes: step.duration.value / 60.0,
            }));
        }

        Ok(Some(RouteSummary {
            distance_km: meters / 1000.0,
            duration_minutes: seconds / 60.0,
            polyline: route.overview_polyline.map(|p| p.points),
            steps,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: Option<String>,
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    overview_polyline: Option<EncodedPolyline>,
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
}

#[derive(Debug, Deserialize)]
struct EncodedPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    distance: Measure,
    duration: Measure,
    #[serde(default)]
    steps: Vec<DirectionsStep>,
}

#[derive(Debug, Deserialize)]
struct DirectionsStep {
    html_instructions: Option<String>,
    distance: Measure,
    duration: Measure,
}

#[derive(Debug, Deserialize)]
struct Measure {
    value: f64,
}
