use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cargopulse::api::rest::router;
use cargopulse::config::Config;
use cargopulse::messaging::dispatch::{NotificationProvider, ProviderError, ProviderReceipt};
use cargopulse::models::ledger::{SyncEvent, SyncOutcome, INTAKE_CREATE};
use cargopulse::models::message::SendStatus;
use cargopulse::models::shipment::{MemberRole, ShipmentStatus};
use cargopulse::state::AppState;
use cargopulse::store::blob::{BlobError, BlobStore, MemoryBlobStore};
use cargopulse::store::{Datastore, MemoryStore};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const FIELD_USER: &str = "field-user";
const WEBHOOK_SECRET: &str = "s3cret";
const BOUNDARY: &str = "cargopulse-test-boundary";

#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, to_e164: &str, body: &str) -> Result<ProviderReceipt, ProviderError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to_e164.to_string(), body.to_string()));
        Ok(ProviderReceipt {
            provider_message_id: format!("SM{}", sent.len()),
            status: SendStatus::Queued,
        })
    }
}

struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn upload(&self, _path: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<(), BlobError> {
        Err(BlobError::Upload("bucket unavailable".to_string()))
    }

    async fn signed_url(&self, path: &str, _ttl: Duration) -> Result<String, BlobError> {
        Err(BlobError::NotFound(path.to_string()))
    }
}

struct TestApp {
    app: axum::Router,
    store: Arc<MemoryStore>,
    org_id: Uuid,
}

fn test_config() -> Config {
    Config {
        twilio_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        app_url: Some("https://track.example".to_string()),
        ..Config::default()
    }
}

fn build(blobs: Arc<dyn BlobStore>, provider: Option<Arc<dyn NotificationProvider>>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let org_id = Uuid::new_v4();
    store.add_member(FIELD_USER, org_id, MemberRole::Field);

    let state = AppState::new(&test_config(), store.clone(), blobs, provider);
    TestApp {
        app: router(Arc::new(state)),
        store,
        org_id,
    }
}

fn setup() -> TestApp {
    build(Arc::new(MemoryBlobStore::new()), None)
}

enum Part<'a> {
    Text(&'a str, String),
    File(&'a str, &'a str, &'a str, Vec<u8>),
}

fn multipart_request(uri: &str, user: Option<&str>, parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, content_type, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body)).unwrap()
}

fn json_request(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn valid_payload() -> Value {
    json!({
        "customerName": "Marcia Campbell",
        "phone": "+447700900123",
        "destination": "Kingston",
        "serviceType": "depot",
        "cargoType": "general",
    })
}

fn intake_request(client_event_id: &str, payload: &Value, photos: usize) -> Request<Body> {
    let mut parts = vec![
        Part::Text("clientEventId", client_event_id.to_string()),
        Part::Text("payload", payload.to_string()),
    ];
    for idx in 0..photos {
        parts.push(Part::File(
            "photos",
            "photo.jpg",
            "image/jpeg",
            format!("photo-{idx}").into_bytes(),
        ));
    }
    multipart_request("/api/field/intake", Some(FIELD_USER), parts)
}

async fn create_shipment(test: &TestApp) -> Value {
    let client_id = Uuid::new_v4().to_string();
    let response = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn shipment_detail(test: &TestApp, id: &str) -> Value {
    let response = test
        .app
        .clone()
        .oneshot(get_request(&format!("/api/shipments/{id}"), Some(FIELD_USER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_reports_store_counts() {
    let test = setup();
    create_shipment(&test).await;

    let response = test.app.clone().oneshot(get_request("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["shipments"], 1);
    assert_eq!(body["customers"], 1);
    assert_eq!(body["syncEvents"], 1);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let test = setup();
    create_shipment(&test).await;

    let response = test.app.clone().oneshot(get_request("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("intake_requests_total"));
    assert!(body.contains("outcome=\"created\""));
}

#[tokio::test]
async fn intake_requires_caller_identity() {
    let test = setup();
    let request = multipart_request(
        "/api/field/intake",
        None,
        vec![
            Part::Text("clientEventId", Uuid::new_v4().to_string()),
            Part::Text("payload", valid_payload().to_string()),
        ],
    );

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn intake_creates_shipment_with_tracking_code() {
    let test = setup();
    let body = create_shipment(&test).await;

    assert_eq!(body["ok"], true);
    assert!(body.get("duplicate").is_none());
    let code = body["trackingCode"].as_str().unwrap();
    let pattern = regex::Regex::new(r"^SHP-[A-Z0-9]{6}$").unwrap();
    assert!(pattern.is_match(code), "unexpected tracking code {code}");

    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    assert_eq!(detail["shipment"]["current_status"], "collected");
    assert_eq!(detail["customer"]["name"], "Marcia Campbell");
    assert_eq!(detail["events"].as_array().unwrap().len(), 1);
    assert_eq!(detail["events"][0]["status"], "collected");
}

#[tokio::test]
async fn replayed_submission_returns_original_shipment() {
    let test = setup();
    let client_id = Uuid::new_v4().to_string();

    let first = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 1))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;

    let second = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 1))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;

    assert_eq!(second["duplicate"], true);
    assert_eq!(second["shipmentId"], first["shipmentId"]);
    assert_eq!(second["trackingCode"], first["trackingCode"]);

    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 1);
    assert_eq!(test.store.customers_for_org(test.org_id).len(), 1);

    let detail = shipment_detail(&test, first["shipmentId"].as_str().unwrap()).await;
    assert_eq!(detail["events"].as_array().unwrap().len(), 1);
    assert_eq!(detail["assets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_duplicates_create_one_shipment() {
    let test = setup();
    let client_id = Uuid::new_v4().to_string();

    let (a, b) = tokio::join!(
        test.app.clone().oneshot(intake_request(&client_id, &valid_payload(), 0)),
        test.app.clone().oneshot(intake_request(&client_id, &valid_payload(), 0)),
    );
    let statuses = [a.unwrap().status(), b.unwrap().status()];

    assert!(statuses.contains(&StatusCode::OK));
    assert!(statuses
        .iter()
        .all(|status| *status == StatusCode::OK || *status == StatusCode::CONFLICT));
    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 1);
}

#[tokio::test]
async fn same_phone_reuses_customer_and_updates_name() {
    let test = setup();
    create_shipment(&test).await;

    let mut renamed = valid_payload();
    renamed["customerName"] = json!("Marcia C. Campbell");
    let response = test
        .app
        .clone()
        .oneshot(intake_request(&Uuid::new_v4().to_string(), &renamed, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let customers = test.store.customers_for_org(test.org_id);
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].name, "Marcia C. Campbell");
    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 2);
}

#[tokio::test]
async fn validation_rejects_short_fields() {
    let test = setup();
    let short = json!({ "customerName": "A", "phone": "12345", "destination": "K" });

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&Uuid::new_v4().to_string(), &short, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("customerName"));
    assert!(error.contains("phone"));
    assert!(error.contains("destination"));
    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 0);

    let minimal = json!({ "customerName": "Al", "phone": "123456", "destination": "KN" });
    let response = test
        .app
        .clone()
        .oneshot(intake_request(&Uuid::new_v4().to_string(), &minimal, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let test = setup();

    let bad_json = multipart_request(
        "/api/field/intake",
        Some(FIELD_USER),
        vec![
            Part::Text("clientEventId", Uuid::new_v4().to_string()),
            Part::Text("payload", "{not json".to_string()),
        ],
    );
    let response = test.app.clone().oneshot(bad_json).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "payload must be valid JSON");

    let no_client_id = multipart_request(
        "/api/field/intake",
        Some(FIELD_USER),
        vec![Part::Text("payload", valid_payload().to_string())],
    );
    let response = test.app.clone().oneshot(no_client_id).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "clientEventId is required");

    let not_multipart = json_request("/api/field/intake", Some(FIELD_USER), valid_payload());
    let response = test.app.clone().oneshot(not_multipart).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn caller_without_membership_is_rejected() {
    let test = setup();
    let request = multipart_request(
        "/api/field/intake",
        Some("stranger"),
        vec![
            Part::Text("clientEventId", Uuid::new_v4().to_string()),
            Part::Text("payload", valid_payload().to_string()),
        ],
    );

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No organization membership");
}

#[tokio::test]
async fn asset_failure_keeps_shipment() {
    let test = build(Arc::new(FailingBlobStore), None);
    let client_id = Uuid::new_v4().to_string();

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 2))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert!(body["assetError"].as_str().unwrap().contains("bucket unavailable"));

    let shipments = test.store.shipments_for_org(test.org_id);
    assert_eq!(shipments.len(), 1);
    let ledger = test
        .store
        .get_sync_event(test.org_id, &client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.shipment_id, Some(shipments[0].id));
    assert!(ledger.error.is_some());

    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    assert_eq!(detail["events"].as_array().unwrap().len(), 1);
    assert!(detail["assets"].as_array().unwrap().is_empty());
}

async fn seed_ledger(test: &TestApp, client_id: &str) -> SyncEvent {
    let event = SyncEvent::new(test.org_id, client_id, INTAKE_CREATE, valid_payload());
    test.store.insert_sync_event(event.clone()).await.unwrap();
    event
}

#[tokio::test]
async fn retry_takes_over_a_failed_attempt() {
    let test = setup();
    let client_id = Uuid::new_v4().to_string();
    seed_ledger(&test, &client_id).await;
    test.store
        .finish_sync_event(test.org_id, &client_id, SyncOutcome {
            error: Some("database unavailable".to_string()),
            ..SyncOutcome::default()
        })
        .await
        .unwrap();

    let retry = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 0))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
    let retry = body_json(retry).await;
    assert!(retry.get("duplicate").is_none());

    let shipments = test.store.shipments_for_org(test.org_id);
    assert_eq!(shipments.len(), 1);
    let ledger = test
        .store
        .get_sync_event(test.org_id, &client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.shipment_id, Some(shipments[0].id));
    assert!(ledger.processed_at.is_some());
    assert!(ledger.error.is_none());

    let again = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 0))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    let again = body_json(again).await;
    assert_eq!(again["duplicate"], true);
    assert_eq!(again["shipmentId"], retry["shipmentId"]);
    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 1);
}

#[tokio::test]
async fn retry_during_a_live_attempt_conflicts() {
    let test = setup();
    let client_id = Uuid::new_v4().to_string();
    seed_ledger(&test, &client_id).await;

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "submission is still processing");
    assert!(test.store.shipments_for_org(test.org_id).is_empty());
}

#[tokio::test]
async fn retry_takes_over_an_abandoned_attempt() {
    let test = setup();
    let client_id = Uuid::new_v4().to_string();
    let mut stale = SyncEvent::new(test.org_id, &client_id, INTAKE_CREATE, valid_payload());
    stale.claimed_at = Utc::now() - chrono::Duration::hours(1);
    test.store.insert_sync_event(stale).await.unwrap();

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&client_id, &valid_payload(), 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.store.shipments_for_org(test.org_id).len(), 1);
}

#[tokio::test]
async fn uploaded_photos_are_stored_with_signed_urls() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let test = build(blobs.clone(), None);

    let mut parts = vec![
        Part::Text("clientEventId", Uuid::new_v4().to_string()),
        Part::Text("payload", valid_payload().to_string()),
        Part::File("photos", "front.png", "image/png", b"front".to_vec()),
    ];
    parts.push(Part::File("signature", "sig.png", "image/png", b"sig".to_vec()));
    let response = test
        .app
        .clone()
        .oneshot(multipart_request("/api/field/intake", Some(FIELD_USER), parts))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let shipment_id = body["shipmentId"].as_str().unwrap();

    let paths = blobs.paths();
    assert_eq!(paths.len(), 2);
    assert!(paths
        .iter()
        .all(|path| path.starts_with(&format!("org/{}/shipments/{shipment_id}/intake/", test.org_id))));
    assert!(paths.iter().all(|path| path.ends_with(".png")));

    let detail = shipment_detail(&test, shipment_id).await;
    let assets = detail["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 2);
    assert!(assets.iter().all(|asset| asset["signed_url"].is_string()));
    let kinds: Vec<&str> = assets.iter().map(|asset| asset["kind"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"pickup_photo"));
    assert!(kinds.contains(&"pickup_signature"));
}

#[tokio::test]
async fn vehicle_intake_keeps_only_vehicle_details() {
    let test = setup();
    let payload = json!({
        "customerName": "Delroy Brown",
        "phone": "07700900456",
        "destination": "Montego Bay",
        "cargoType": "vehicle",
        "quantity": 4,
        "weightKg": 1200,
        "vehicleMake": "Toyota",
        "vehicleModel": "Corolla",
        "keysReceived": true,
    });

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&Uuid::new_v4().to_string(), &payload, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let shipments = test.store.shipments_for_org(test.org_id);
    let meta = &shipments[0].cargo_meta;
    let vehicle = meta.vehicle.as_ref().unwrap();
    assert_eq!(vehicle.make.as_deref(), Some("Toyota"));
    assert_eq!(vehicle.model.as_deref(), Some("Corolla"));
    assert_eq!(vehicle.keys_received, Some(true));
    assert!(meta.quantity.is_none());
    assert!(meta.dimensions.is_none());
}

#[tokio::test]
async fn barrel_intake_keeps_quantity() {
    let test = setup();
    let payload = json!({
        "customerName": "Delroy Brown",
        "phone": "07700900456",
        "destination": "Montego Bay",
        "cargoType": "barrel",
        "quantity": "3",
        "vehicleMake": "Toyota",
    });

    let response = test
        .app
        .clone()
        .oneshot(intake_request(&Uuid::new_v4().to_string(), &payload, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let shipments = test.store.shipments_for_org(test.org_id);
    let meta = &shipments[0].cargo_meta;
    assert_eq!(meta.quantity, Some(3));
    assert!(meta.vehicle.is_none());
    assert!(meta.dimensions.is_none());
}

#[tokio::test]
async fn collected_notification_is_sent_through_provider() {
    let provider = Arc::new(RecordingProvider::default());
    let test = build(Arc::new(MemoryBlobStore::new()), Some(provider.clone()));
    test.store
        .upsert_template(
            test.org_id,
            ShipmentStatus::Collected,
            "Hi {{name}}, {{code}} collected. Track: {{tracking_url}}",
        )
        .await
        .unwrap();

    let body = create_shipment(&test).await;
    let code = body["trackingCode"].as_str().unwrap();

    let sent = provider.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+447700900123");
    assert!(sent[0].1.contains("Hi Marcia Campbell"));
    assert!(sent[0].1.contains(&format!("https://track.example/t/{code}")));

    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["provider"], "recording");
    assert_eq!(messages[0]["provider_message_id"], "SM1");
    assert_eq!(messages[0]["send_status"], "queued");
}

#[tokio::test]
async fn disabled_template_sends_nothing() {
    let provider = Arc::new(RecordingProvider::default());
    let test = build(Arc::new(MemoryBlobStore::new()), Some(provider.clone()));
    test.store
        .upsert_template(test.org_id, ShipmentStatus::Collected, "Hi {{name}}")
        .await
        .unwrap();
    test.store
        .set_template_enabled(test.org_id, ShipmentStatus::Collected, false);

    let body = create_shipment(&test).await;

    assert!(provider.sent.lock().unwrap().is_empty());
    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    assert!(detail["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn status_update_appends_event() {
    let test = setup();
    let body = create_shipment(&test).await;
    let id = body["shipmentId"].as_str().unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/status",
            Some(FIELD_USER),
            json!({ "shipmentId": id, "status": "loaded", "note": "Container 12" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["shipment"]["current_status"], "loaded");

    let detail = shipment_detail(&test, id).await;
    assert_eq!(detail["events"].as_array().unwrap().len(), 2);
    assert_eq!(detail["events"][0]["status"], "loaded");
    assert_eq!(detail["events"][0]["note"], "Container 12");
}

#[tokio::test]
async fn delivered_is_only_reachable_through_pod() {
    let test = setup();
    let body = create_shipment(&test).await;
    let id = body["shipmentId"].as_str().unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/status",
            Some(FIELD_USER),
            json!({ "shipmentId": id, "status": "delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/status",
            Some(FIELD_USER),
            json!({ "shipmentId": Uuid::new_v4(), "status": "loaded" }),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

async fn complete_pod(test: &TestApp, shipment_id: &str) -> axum::response::Response {
    let request = multipart_request(
        "/api/pod/complete",
        Some(FIELD_USER),
        vec![
            Part::Text("shipmentId", shipment_id.to_string()),
            Part::Text("receiverName", "Joy Campbell".to_string()),
            Part::File("file", "pod.jpg", "image/jpeg", b"pod".to_vec()),
        ],
    );
    test.app.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn pod_delivers_and_locks_shipment() {
    let provider = Arc::new(RecordingProvider::default());
    let test = build(Arc::new(MemoryBlobStore::new()), Some(provider.clone()));
    test.store
        .upsert_template(test.org_id, ShipmentStatus::Delivered, "{{code}} delivered")
        .await
        .unwrap();

    let body = create_shipment(&test).await;
    let id = body["shipmentId"].as_str().unwrap();

    let response = complete_pod(&test, id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_json(response).await;
    assert_eq!(receipt["ok"], true);
    let path = receipt["path"].as_str().unwrap();
    assert!(path.starts_with(&format!("org/{}/shipments/{id}/pod/", test.org_id)));
    assert!(path.ends_with(".jpg"));

    let detail = shipment_detail(&test, id).await;
    assert_eq!(detail["shipment"]["current_status"], "delivered");
    assert_eq!(detail["pod"]["receiver_name"], "Joy Campbell");
    assert!(detail["pod"]["signed_url"].is_string());
    assert_eq!(detail["events"][0]["note"], "POD captured (Joy Campbell)");

    let again = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/status",
            Some(FIELD_USER),
            json!({ "shipmentId": id, "status": "loaded" }),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let second_pod = complete_pod(&test, id).await;
    assert_eq!(second_pod.status(), StatusCode::CONFLICT);
    assert_eq!(provider.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn pod_requires_receiver_name() {
    let test = setup();
    let body = create_shipment(&test).await;

    let request = multipart_request(
        "/api/pod/complete",
        Some(FIELD_USER),
        vec![
            Part::Text("shipmentId", body["shipmentId"].as_str().unwrap().to_string()),
            Part::Text("receiverName", "  ".to_string()),
            Part::File("file", "pod.jpg", "image/jpeg", b"pod".to_vec()),
        ],
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "receiverName is required");
}

#[tokio::test]
async fn bulk_update_skips_locked_and_missing() {
    let test = setup();
    let delivered = create_shipment(&test).await["shipmentId"].as_str().unwrap().to_string();
    let open = create_shipment(&test).await["shipmentId"].as_str().unwrap().to_string();
    let missing = Uuid::new_v4().to_string();
    assert_eq!(complete_pod(&test, &delivered).await.status(), StatusCode::OK);

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/bulk/status",
            Some(FIELD_USER),
            json!({
                "shipmentIds": [delivered, open, missing],
                "status": "departed_uk",
                "autoLog": false,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["updated"], 1);
    assert_eq!(body["skipped"], 2);
    let results = body["results"].as_array().unwrap();
    let reason_for = |id: &str| {
        results
            .iter()
            .find(|result| result["id"] == id)
            .and_then(|result| result["reason"].as_str())
            .map(str::to_string)
    };
    assert_eq!(reason_for(&delivered).as_deref(), Some("delivered_locked"));
    assert_eq!(reason_for(&missing).as_deref(), Some("not_found"));
    assert_eq!(reason_for(&open), None);

    let detail = shipment_detail(&test, &open).await;
    assert_eq!(detail["shipment"]["current_status"], "departed_uk");
}

#[tokio::test]
async fn bulk_update_rejects_empty_and_delivered() {
    let test = setup();

    let empty = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/bulk/status",
            Some(FIELD_USER),
            json!({ "shipmentIds": [], "status": "loaded" }),
        ))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let delivered = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/shipments/bulk/status",
            Some(FIELD_USER),
            json!({ "shipmentIds": [Uuid::new_v4()], "status": "delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(delivered.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shipments_are_scoped_to_the_callers_org() {
    let test = setup();
    let body = create_shipment(&test).await;
    test.store.add_member("other-user", Uuid::new_v4(), MemberRole::Staff);

    let response = test
        .app
        .clone()
        .oneshot(get_request(
            &format!("/api/shipments/{}", body["shipmentId"].as_str().unwrap()),
            Some("other-user"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_callback_updates_message_log() {
    let provider = Arc::new(RecordingProvider::default());
    let test = build(Arc::new(MemoryBlobStore::new()), Some(provider));
    test.store
        .upsert_template(test.org_id, ShipmentStatus::Collected, "{{code}} collected")
        .await
        .unwrap();
    let body = create_shipment(&test).await;

    let rejected = test
        .app
        .clone()
        .oneshot(form_request(
            "/api/webhooks/twilio/status?secret=wrong",
            "MessageSid=SM1&MessageStatus=delivered",
        ))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let response = test
        .app
        .clone()
        .oneshot(form_request(
            &format!("/api/webhooks/twilio/status?secret={WEBHOOK_SECRET}"),
            "MessageSid=SM1&MessageStatus=undelivered&ErrorCode=63016&ErrorMessage=Outside+window",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    assert_eq!(detail["messages"][0]["send_status"], "undelivered");
    assert_eq!(detail["messages"][0]["error"], "63016 Outside window");
}

#[tokio::test]
async fn onboarding_creates_org_and_seeds_templates() {
    let test = setup();

    let short = test
        .app
        .clone()
        .oneshot(json_request("/api/onboarding", Some("new-user"), json!({ "orgName": "A" })))
        .await
        .unwrap();
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/onboarding",
            Some("new-user"),
            json!({ "orgName": "Island Freight" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    let org_id: Uuid = body["orgId"].as_str().unwrap().parse().unwrap();

    let template = test
        .store
        .find_enabled_template(org_id, ShipmentStatus::Collected)
        .await
        .unwrap();
    assert!(template.is_some());

    let again = test
        .app
        .clone()
        .oneshot(json_request(
            "/api/onboarding",
            Some("new-user"),
            json!({ "orgName": "Island Freight" }),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn default_templates_require_admin_or_staff() {
    let test = setup();

    let forbidden = test
        .app
        .clone()
        .oneshot(json_request("/api/setup/default-templates", Some(FIELD_USER), json!({})))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    test.store.add_member("staff-user", test.org_id, MemberRole::Staff);
    let response = test
        .app
        .clone()
        .oneshot(json_request("/api/setup/default-templates", Some("staff-user"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["templates"], 7);

    let body = create_shipment(&test).await;
    let detail = shipment_detail(&test, body["shipmentId"].as_str().unwrap()).await;
    assert_eq!(detail["messages"][0]["send_status"], "logged");
}
