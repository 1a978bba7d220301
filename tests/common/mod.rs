#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use courier_dispatch::api::rest::actor::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use courier_dispatch::api::rest::router;
use courier_dispatch::config::DispatchSettings;
use courier_dispatch::geo::GeoService;
use courier_dispatch::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    pub admin: Uuid,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(DispatchSettings::default())
    }

    pub fn with_settings(settings: DispatchSettings) -> Self {
        Self::build(settings, GeoService::disabled(40.0))
    }

    pub fn with_geo(geo: GeoService) -> Self {
        Self::build(DispatchSettings::default(), geo)
    }

    fn build(settings: DispatchSettings, geo: GeoService) -> Self {
        let state = Arc::new(AppState::new(settings, geo, 256));
        Self {
            app: router(state.clone()),
            state,
            admin: Uuid::new_v4(),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn as_admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(request(method, uri, Some((self.admin, "admin")), body))
            .await
    }

    pub async fn as_courier(
        &self,
        courier: Uuid,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(request(method, uri, Some((courier, "courier")), body))
            .await
    }

    pub async fn courier(&self, name: &str, location: Option<(f64, f64)>) -> Uuid {
        let location = location.map(|(lat, lon)| json!({ "lat": lat, "lon": lon }));
        let (status, body) = self
            .send(request(
                "POST",
                "/couriers",
                None,
                Some(json!({ "name": name, "role": "courier", "location": location })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id_of(&body)
    }

    /// Confirmed order with a destination and both ledger references, so
    /// only assignment and loading stand between it and `in_process`.
    pub async fn confirmed_order(&self, destination: (f64, f64)) -> Uuid {
        let (status, body) = self
            .send(request(
                "POST",
                "/orders",
                None,
                Some(json!({
                    "status": "confirmed",
                    "destination": { "lat": destination.0, "lon": destination.1 },
                    "ledger_party_ref": "CUST-0001",
                    "ledger_order_ref": "SO-0001"
                })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id_of(&body)
    }

    pub async fn assign(&self, order: Uuid, courier: Uuid) -> Value {
        let (status, body) = self
            .as_admin(
                "POST",
                "/assignments",
                Some(json!({ "order_id": order, "courier_id": courier })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    pub async fn order(&self, order: Uuid) -> Value {
        let (status, body) = self
            .send(request("GET", &format!("/orders/{order}"), None, None))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

pub fn request(
    method: &str,
    uri: &str,
    actor: Option<(Uuid, &str)>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder
            .header(ACTOR_ID_HEADER, id.to_string())
            .header(ACTOR_ROLE_HEADER, role);
    }

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn id_of(value: &Value) -> Uuid {
    value["id"].as_str().unwrap().parse().unwrap()
}

pub fn uuid_at(value: &Value, pointer: &str) -> Uuid {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("no uuid at {pointer} in {value}"))
        .parse()
        .unwrap()
}
