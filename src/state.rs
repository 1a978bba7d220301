use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::error::{AppError, ErrorCode};
use crate::geo::GeoService;
use crate::models::courier::Courier;
use crate::models::delivery::DeliveryEvent;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub couriers: DashMap<Uuid, Courier>,
    pub store: Store,
    pub geo: GeoService,
    pub settings: DispatchSettings,
    pub delivery_events_tx: broadcast::Sender<DeliveryEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: DispatchSettings, geo: GeoService, event_buffer_size: usize) -> Self {
        let (delivery_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let metrics = Metrics::new();

        Self {
            couriers: DashMap::new(),
            store: Store::new(),
            geo: geo.with_fallback_counter(metrics.geo_fallbacks_total.clone()),
            settings,
            delivery_events_tx,
            metrics,
        }
    }

    pub fn courier(&self, id: Uuid) -> Result<Courier, AppError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                AppError::not_found(ErrorCode::CourierNotFound, format!("courier {id} not found"))
            })
    }

    /// Fetches a courier and checks it may receive work.
    pub fn eligible_courier(&self, id: Uuid) -> Result<Courier, AppError> {
        let courier = self.courier(id)?;

        if !self.settings.is_courier_role(courier.role) {
            return Err(AppError::invalid_field(
                ErrorCode::InvalidCourierRole,
                "courier_id",
                format!("user {id} has role {} which cannot take deliveries", courier.role),
            ));
        }
        if !courier.active {
            return Err(AppError::invalid_field(
                ErrorCode::CourierInactive,
                "courier_id",
                format!("courier {id} is not active"),
            ));
        }

        Ok(courier)
    }

    /// Active couriers holding an eligible role.
    pub fn eligible_couriers(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|c| c.active && self.settings.is_courier_role(c.role))
            .collect()
    }

    pub fn publish(&self, events: Vec<DeliveryEvent>) {
        for event in events {
            let _ = self.delivery_events_tx.send(event);
        }
    }
}
