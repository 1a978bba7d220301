//! OpenStreetMap stack: OSRM for directions, Nominatim for geocoding.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::geo::provider::{GeoError, MapProvider, RouteStep, RouteSummary};
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub osrm_url: String,
    pub nominatim_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            osrm_url: "http://localhost:5000".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmProvider {
    config: OsrmConfig,
    client: reqwest::Client,
}

impl OsrmProvider {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("courier-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl MapProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "osrm"
    }

    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GeoError> {
        let url = format!("{}/search", self.config.nominatim_url);
        let hits: Vec<NominatimPlace> = self
            .client
            .get(url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let lat = hit.lat.parse::<f64>().map_err(|_| GeoError::Malformed("lat"))?;
        let lon = hit.lon.parse::<f64>().map_err(|_| GeoError::Malformed("lon"))?;
        Ok(Some(GeoPoint { lat, lon }))
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<Option<String>, GeoError> {
        let url = format!("{}/reverse", self.config.nominatim_url);
        let lat = point.lat.to_string();
        let lon = point.lon.to_string();
        let body: NominatimReverse = self
            .client
            .get(url)
            .query(&[("lat", lat.as_str()), ("lon", lon.as_str()), ("format", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body.display_name)
    }

    async fn directions(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        waypoints: &[GeoPoint],
    ) -> Result<Option<RouteSummary>, GeoError> {
        // OSRM wants lon,lat pairs in visiting order.
        let coords = std::iter::once(&origin)
            .chain(waypoints.iter())
            .chain(std::iter::once(&destination))
            .map(|p| format!("{:.6},{:.6}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(";");

        let url = format!(
            "{}/route/v1/{}/{}",
            self.config.osrm_url, self.config.profile, coords
        );

        let body: OsrmRouteResponse = self
            .client
            .get(url)
            .query(&[
                ("overview", "full"),
                ("geometries", "polyline"),
                ("steps", "true"),
            ])
            .send()
            .await?
            .json()
            .await?;

        match body.code.as_str() {
            "Ok" => {}
            "NoRoute" | "NoSegment" => return Ok(None),
            other => return Err(GeoError::Provider(other.to_string())),
        }

        let Some(route) = body.routes.into_iter().next() else {
            return Ok(None);
        };

        let steps = route
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|step| RouteStep {
                instruction: step.describe(),
                distance_km: step.distance / 1000.0,
                duration_minutes: step.duration / 60.0,
            })
            .collect();

        Ok(Some(RouteSummary {
            distance_km: route.distance / 1000.0,
            duration_minutes: route.duration / 60.0,
            polyline: route.geometry,
            steps,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: Option<String>,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    duration: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    modifier: Option<String>,
}

impl OsrmStep {
    fn describe(&self) -> String {
        let mut text = self.maneuver.kind.clone();
        if let Some(modifier) = &self.maneuver.modifier {
            text.push(' ');
            text.push_str(modifier);
        }
        if !self.name.is_empty() {
            text.push_str(" onto ");
            text.push_str(&self.name);
        }
        text
    }
}
