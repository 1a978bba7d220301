mod common;

use axum::http::StatusCode;
use common::{id_of, uuid_at, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

fn order_ids(value: &Value) -> Vec<Uuid> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().parse().unwrap())
        .collect()
}

fn stop_order_ids(route: &Value) -> Vec<Uuid> {
    route["stops"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["order_id"].as_str().unwrap().parse().unwrap())
        .collect()
}

fn stop_for(route: &Value, order: Uuid) -> Value {
    route["stops"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["order_id"] == json!(order.to_string()))
        .cloned()
        .unwrap()
}

async fn create_route(app: &TestApp, courier: Uuid, capacity: u32, orders: &[Uuid]) -> (StatusCode, Value) {
    app.as_admin(
        "POST",
        "/routes",
        Some(json!({
            "courier_id": courier,
            "name": "Morning run",
            "capacity": capacity,
            "order_ids": orders
        })),
    )
    .await
}

#[tokio::test]
async fn created_route_reads_back_in_supplied_order() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((19.40, -99.10)).await;
    let b = app.confirmed_order((19.41, -99.11)).await;
    let c = app.confirmed_order((19.42, -99.12)).await;

    let (status, route) = create_route(&app, courier, 3, &[a, b, c]).await;
    assert_eq!(status, StatusCode::OK, "{route}");
    assert_eq!(route["state"], "planned");
    assert_eq!(route["stop_count"], 3);

    let (status, active) = app
        .as_courier(courier, "GET", "/routes/active", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&active), id_of(&route));
    assert_eq!(stop_order_ids(&active), vec![a, b, c]);
    let sequence: Vec<u64> = active["stops"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["sequence_number"].as_u64().unwrap())
        .collect();
    assert_eq!(sequence, vec![1, 2, 3]);
    assert!(active["alternate"].is_null());
    assert_eq!(order_ids(&active["effective_order"]), vec![a, b, c]);

    for order in [a, b, c] {
        let view = app.order(order).await;
        assert_eq!(view["route_id"], route["id"]);
        assert_eq!(view["assigned_courier"], json!(courier.to_string()));
    }
}

#[tokio::test]
async fn alternate_order_overlays_without_touching_stored_sequence() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((19.40, -99.10)).await;
    let b = app.confirmed_order((19.41, -99.11)).await;
    let c = app.confirmed_order((19.42, -99.12)).await;
    let (_, route) = create_route(&app, courier, 3, &[a, b, c]).await;
    let route_id = id_of(&route);

    let (status, plan) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/alternates"),
            Some(json!({ "new_sequence": [c, a, b], "reason": "school zone closed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{plan}");
    assert_eq!(plan["active"], true);
    let plan_id = id_of(&plan);

    let (_, view) = app
        .as_courier(courier, "GET", &format!("/routes/{route_id}"), None)
        .await;
    assert_eq!(order_ids(&view["effective_order"]), vec![c, a, b]);
    assert_eq!(stop_order_ids(&view), vec![a, b, c]);
    assert_eq!(view["alternate"]["reason"], "school zone closed");

    let (status, view) = app
        .as_courier(
            courier,
            "PATCH",
            &format!("/routes/{route_id}/alternates/{plan_id}"),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert!(view["alternate"].is_null());
    assert_eq!(order_ids(&view["effective_order"]), vec![a, b, c]);

    let (_, view) = app
        .as_courier(
            courier,
            "PATCH",
            &format!("/routes/{route_id}/alternates/{plan_id}"),
            Some(json!({ "active": true })),
        )
        .await;
    assert_eq!(order_ids(&view["effective_order"]), vec![c, a, b]);
    assert_eq!(stop_order_ids(&view), vec![a, b, c]);
}

#[tokio::test]
async fn newer_alternate_replaces_the_active_one() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    let b = app.confirmed_order((0.0, 0.1)).await;
    let (_, route) = create_route(&app, courier, 2, &[a, b]).await;
    let route_id = id_of(&route);

    for sequence in [[b, a], [a, b]] {
        let (status, _) = app
            .as_admin(
                "POST",
                &format!("/routes/{route_id}/alternates"),
                Some(json!({ "new_sequence": sequence })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, view) = app
        .as_admin("GET", &format!("/routes/{route_id}"), None)
        .await;
    assert_eq!(order_ids(&view["effective_order"]), vec![a, b]);
}

#[tokio::test]
async fn alternate_must_be_a_permutation_of_the_stops() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    let b = app.confirmed_order((0.0, 0.1)).await;
    let (_, route) = create_route(&app, courier, 2, &[a, b]).await;
    let route_id = id_of(&route);

    for bad in [json!([a]), json!([a, a]), json!([a, Uuid::new_v4()])] {
        let (status, body) = app
            .as_courier(
                courier,
                "POST",
                &format!("/routes/{route_id}/alternates"),
                Some(json!({ "new_sequence": bad })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_sequence");
    }
}

#[tokio::test]
async fn route_over_capacity_is_rejected() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    let b = app.confirmed_order((0.0, 0.1)).await;
    let c = app.confirmed_order((0.0, 0.2)).await;

    let (status, body) = create_route(&app, courier, 2, &[a, b, c]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "capacity_exceeded");
    assert_eq!(body["field"], "order_ids");
}

#[tokio::test]
async fn order_already_in_an_open_route_is_rejected_and_nothing_persists() {
    let app = TestApp::new();
    let first = app.courier("Rita", None).await;
    let second = app.courier("Sam", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    let b = app.confirmed_order((0.0, 0.1)).await;
    let c = app.confirmed_order((0.0, 0.2)).await;

    let (status, _) = create_route(&app, first, 2, &[a, b]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = create_route(&app, second, 2, &[c, a]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "order_in_active_route");

    let c_view = app.order(c).await;
    assert!(c_view["assigned_courier"].is_null());
    assert!(c_view["route_id"].is_null());

    let (_, routes) = app.as_admin("GET", "/routes", None).await;
    assert_eq!(routes["total"], 1);
}

#[tokio::test]
async fn order_held_by_another_courier_cannot_be_routed() {
    let app = TestApp::new();
    let first = app.courier("Rita", None).await;
    let second = app.courier("Sam", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    app.assign(a, first).await;

    let (status, body) = create_route(&app, second, 1, &[a]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "order_assigned_elsewhere");
}

#[tokio::test]
async fn routing_reuses_an_existing_delivery_of_the_same_courier() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.0)).await;
    let delivery = uuid_at(&app.assign(a, courier).await, "/delivery/id");

    let (status, route) = create_route(&app, courier, 1, &[a]).await;
    assert_eq!(status, StatusCode::OK, "{route}");
    assert_eq!(uuid_at(&route, "/stops/0/delivery_id"), delivery);

    let (_, record) = app
        .as_courier(courier, "GET", &format!("/deliveries/{delivery}"), None)
        .await;
    assert_eq!(record["route_id"], route["id"]);
}

#[tokio::test]
async fn route_lifecycle_start_then_finish() {
    let app = TestApp::new();
    let courier = app.courier("Rita", Some((0.0, 0.0))).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let b = app.confirmed_order((0.0, 0.2)).await;
    let (_, route) = create_route(&app, courier, 2, &[a, b]).await;
    let route_id = id_of(&route);

    let (status, view) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/accept"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "active");

    let (status, view) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "in_progress");
    assert!(view["start_at"].is_string());
    assert_eq!(stop_for(&view, a)["state"], "en_route");

    let a_delivery = uuid_at(&stop_for(&view, a), "/delivery_id");
    let (_, record) = app
        .as_courier(courier, "GET", &format!("/deliveries/{a_delivery}"), None)
        .await;
    assert_eq!(record["state"], "in_transit");
    assert_eq!(app.order(a).await["status"], "shipped");

    let (status, view) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/finish"),
            Some(json!({ "delivered_order_ids": [a], "undelivered_order_ids": [b] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "completed");
    assert!(view["end_at"].is_string());
    assert_eq!(stop_for(&view, a)["state"], "delivered");
    assert_eq!(stop_for(&view, b)["state"], "undelivered");

    assert_eq!(app.order(a).await["status"], "delivered");
    let b_view = app.order(b).await;
    assert_eq!(b_view["status"], "in_process");
    assert!(b_view["route_id"].is_null());
    assert!(b_view["assigned_courier"].is_null());

    let (_, active) = app
        .as_courier(courier, "GET", "/routes/active", None)
        .await;
    assert!(active.is_null());
}

#[tokio::test]
async fn finish_is_all_or_nothing() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let b = app.confirmed_order((0.0, 0.2)).await;
    let (_, route) = create_route(&app, courier, 2, &[a, b]).await;
    let route_id = id_of(&route);
    let (_, view) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    let b_delivery = uuid_at(&stop_for(&view, b), "/delivery_id");

    let (status, _) = app
        .as_courier(
            courier,
            "POST",
            &format!("/deliveries/{b_delivery}/fail"),
            Some(json!({ "reason": "gate locked" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/finish"),
            Some(json!({ "delivered_order_ids": [a, b] })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_delivery_state");

    assert_eq!(app.order(a).await["status"], "shipped");
    let (_, view) = app
        .as_courier(courier, "GET", &format!("/routes/{route_id}"), None)
        .await;
    assert_eq!(view["state"], "in_progress");
    assert_eq!(stop_for(&view, a)["state"], "en_route");
}

#[tokio::test]
async fn finish_rejects_orders_outside_the_route() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let stray = app.confirmed_order((0.0, 0.2)).await;
    let (_, route) = create_route(&app, courier, 1, &[a]).await;
    let route_id = id_of(&route);
    app.as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;

    let (status, body) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/finish"),
            Some(json!({ "delivered_order_ids": [a], "undelivered_order_ids": [stray] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "undelivered_order_ids");
    assert_eq!(app.order(a).await["status"], "shipped");
}

#[tokio::test]
async fn finish_accepts_stops_completed_one_by_one() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let (_, route) = create_route(&app, courier, 1, &[a]).await;
    let route_id = id_of(&route);
    let (_, view) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    let a_delivery = uuid_at(&stop_for(&view, a), "/delivery_id");

    let (status, record) = app
        .as_courier(courier, "POST", &format!("/deliveries/{a_delivery}/complete"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{record}");

    let (status, view) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/finish"),
            Some(json!({ "delivered_order_ids": [a] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "completed");
    assert_eq!(stop_for(&view, a)["state"], "delivered");
    assert_eq!(app.order(a).await["status"], "delivered");

    let (_, record) = app
        .as_courier(courier, "GET", &format!("/deliveries/{a_delivery}"), None)
        .await;
    assert_eq!(record["state"], "delivered");
}

#[tokio::test]
async fn finish_releases_unlisted_stops() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let b = app.confirmed_order((0.0, 0.2)).await;
    let (_, route) = create_route(&app, courier, 2, &[a, b]).await;
    let route_id = id_of(&route);
    let (_, view) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    let b_delivery = uuid_at(&stop_for(&view, b), "/delivery_id");

    let (status, view) = app
        .as_courier(
            courier,
            "POST",
            &format!("/routes/{route_id}/finish"),
            Some(json!({ "delivered_order_ids": [a] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "completed");
    assert_eq!(stop_for(&view, b)["state"], "undelivered");

    let b_view = app.order(b).await;
    assert_eq!(b_view["status"], "in_process");
    assert!(b_view["route_id"].is_null());
    assert!(b_view["assigned_courier"].is_null());

    let (_, record) = app
        .as_courier(courier, "GET", &format!("/deliveries/{b_delivery}"), None)
        .await;
    assert_eq!(record["state"], "cancelled");
}

#[tokio::test]
async fn route_state_guards() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let other = app.courier("Sam", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let (_, route) = create_route(&app, courier, 1, &[a]).await;
    let route_id = id_of(&route);

    let (status, body) = app
        .as_courier(other, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission_denied");

    let (status, body) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/finish"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_route_state");

    app.as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    let (status, _) = app
        .as_courier(courier, "POST", &format!("/routes/{route_id}/start"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn couriers_cannot_create_routes() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;

    let (status, body) = app
        .as_courier(
            courier,
            "POST",
            "/routes",
            Some(json!({
                "courier_id": courier,
                "name": "Mine",
                "capacity": 1,
                "order_ids": [a]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission_denied");
}

#[tokio::test]
async fn optimized_route_visits_nearest_first() {
    let app = TestApp::new();
    let courier = app.courier("Rita", Some((0.0, 0.0))).await;
    let far = app.confirmed_order((0.0, 0.3)).await;
    let near = app.confirmed_order((0.0, 0.1)).await;
    let mid = app.confirmed_order((0.0, 0.2)).await;

    let (status, route) = app
        .as_admin(
            "POST",
            "/routes",
            Some(json!({
                "courier_id": courier,
                "name": "Optimized",
                "capacity": 3,
                "order_ids": [far, near, mid],
                "optimize": true
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{route}");
    assert_eq!(stop_order_ids(&route), vec![near, mid, far]);

    let first_leg = &route["stops"][0]["leg"];
    assert_eq!(first_leg["source"], "approximate");
    assert!(first_leg["distance_km"].as_f64().unwrap() > 10.0);
}

#[tokio::test]
async fn cancelled_route_frees_its_orders() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let a = app.confirmed_order((0.0, 0.1)).await;
    let (_, route) = create_route(&app, courier, 1, &[a]).await;
    let route_id = id_of(&route);

    let (status, view) = app
        .as_admin("POST", &format!("/routes/{route_id}/cancel"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["state"], "cancelled");
    assert_eq!(stop_for(&view, a)["state"], "cancelled");

    let (_, held) = app
        .as_admin("GET", &format!("/assignments?courier_id={courier}"), None)
        .await;
    assert_eq!(held["total"], 1);

    let (status, _) = create_route(&app, courier, 1, &[a]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn route_listing_is_paginated_and_admin_only() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    for lon in [0.1, 0.2] {
        let order = app.confirmed_order((0.0, lon)).await;
        let (status, _) = create_route(&app, courier, 1, &[order]).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, page) = app
        .as_admin("GET", "/routes?state=planned&per_page=1&page=2", None)
        .await;
    assert_eq!(status, StatusCode::OK, "{page}");
    assert_eq!(page["total"], 2);
    assert_eq!(page["page"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    for uri in [
        format!("/routes?page={}", usize::MAX),
        format!("/assignments?page={}&per_page=100", usize::MAX),
    ] {
        let (status, page) = app.as_admin("GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK, "{page}");
        assert!(page["items"].as_array().unwrap().is_empty());
    }

    let (status, _) = app.as_courier(courier, "GET", "/routes", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn assigned_orders_view_excludes_routed_orders() {
    let app = TestApp::new();
    let courier = app.courier("Rita", None).await;
    let loose = app.confirmed_order((0.0, 0.1)).await;
    let routed = app.confirmed_order((0.0, 0.2)).await;
    app.assign(loose, courier).await;
    create_route(&app, courier, 1, &[routed]).await;

    let (status, page) = app.as_admin("GET", "/assignments", None).await;
    assert_eq!(status, StatusCode::OK, "{page}");
    assert_eq!(page["total"], 1);
    assert_eq!(uuid_at(&page, "/items/0/order/id"), loose);
}
