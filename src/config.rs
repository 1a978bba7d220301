use std::env;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::actor::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapProviderKind {
    None,
    Osrm,
    Google,
}

impl FromStr for MapProviderKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(MapProviderKind::None),
            "osrm" => Ok(MapProviderKind::Osrm),
            "google" => Ok(MapProviderKind::Google),
            other => Err(format!("unknown map provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub dispatch: DispatchSettings,
    pub map_provider: MapProviderKind,
    pub osrm_url: String,
    pub nominatim_url: String,
    pub google_maps_url: String,
    pub google_maps_api_key: Option<String>,
    pub geo_timeout_secs: u64,
    pub fallback_speed_kmh: f64,
}

/// Business knobs the engines read at request time.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Couriers at or above this many active deliveries are not offered work.
    pub max_inflight_deliveries: usize,
    pub courier_roles: Vec<Role>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_inflight_deliveries: 5,
            courier_roles: vec![Role::Courier],
        }
    }
}

impl DispatchSettings {
    pub fn is_courier_role(&self, role: Role) -> bool {
        self.courier_roles.contains(&role)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatchSettings::default();
        let max_inflight_deliveries =
            parse_or_default("MAX_INFLIGHT_DELIVERIES", defaults.max_inflight_deliveries)?;
        if max_inflight_deliveries == 0 {
            return Err(AppError::Internal(
                "invalid MAX_INFLIGHT_DELIVERIES: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch: DispatchSettings {
                max_inflight_deliveries,
                courier_roles: parse_roles("COURIER_ROLES", defaults.courier_roles)?,
            },
            map_provider: parse_or_default("MAP_PROVIDER", MapProviderKind::None)?,
            osrm_url: env::var("OSRM_URL").unwrap_or_else(|_| "http://localhost:5000".to_string()),
            nominatim_url: env::var("NOMINATIM_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
            google_maps_url: env::var("GOOGLE_MAPS_URL")
                .unwrap_or_else(|_| "https://maps.googleapis.com".to_string()),
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY").ok(),
            geo_timeout_secs: parse_or_default("GEO_TIMEOUT_SECS", 10)?,
            fallback_speed_kmh: parse_or_default("FALLBACK_SPEED_KMH", 40.0)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_roles(key: &str, default: Vec<Role>) -> Result<Vec<Role>, AppError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    let roles = raw
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| part.parse::<Role>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))?;

    if roles.is_empty() {
        return Err(AppError::Internal(format!("invalid {key}: no roles listed")));
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_known_names() {
        assert_eq!("OSRM".parse::<MapProviderKind>(), Ok(MapProviderKind::Osrm));
        assert_eq!("".parse::<MapProviderKind>(), Ok(MapProviderKind::None));
        assert!("here".parse::<MapProviderKind>().is_err());
    }

    #[test]
    fn default_settings_only_accept_couriers() {
        let settings = DispatchSettings::default();
        assert!(settings.is_courier_role(Role::Courier));
        assert!(!settings.is_courier_role(Role::Customer));
        assert_eq!(settings.max_inflight_deliveries, 5);
    }
}
