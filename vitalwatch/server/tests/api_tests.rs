//! HTTP contract tests driving the router in-process.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shared_event_bus::{EventKind, MemoryEventBus};
use tower::ServiceExt;
use vitalwatch_model::{
    FeatureVector, OutlierDetector, OutlierLabel, TrainingConfig, TrainingPipeline,
    VitalsAnalyzer, VitalsTelemetry,
};
use vitalwatch_server::{router, AppState, CredentialStore, SqliteCredentialStore};

struct AlwaysOutlier;

impl OutlierDetector for AlwaysOutlier {
    fn predict(&self, _features: &FeatureVector) -> OutlierLabel {
        OutlierLabel::Outlier
    }
}

fn app_with(analyzer: VitalsAnalyzer) -> (Router, Arc<MemoryEventBus>) {
    let store: Arc<dyn CredentialStore> =
        Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
    app_with_store(analyzer, store)
}

fn app_with_store(
    analyzer: VitalsAnalyzer,
    store: Arc<dyn CredentialStore>,
) -> (Router, Arc<MemoryEventBus>) {
    let bus = Arc::new(MemoryEventBus::new(32));
    let telemetry = VitalsTelemetry::builder("vitalwatch-server")
        .event_publisher(bus.clone())
        .build()
        .unwrap();
    (router(AppState::new(analyzer, store, telemetry)), bus)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_reports_model_state() {
    let (app, _) = app_with(VitalsAnalyzer::untrained());
    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "running", "model_loaded": false }));

    let (app, _) = app_with(VitalsAnalyzer::with_detector(AlwaysOutlier));
    let (_, body) = send(&app, "GET", "/", None).await;
    assert_eq!(body["model_loaded"], true);
}

#[tokio::test]
async fn registering_twice_is_rejected() {
    let (app, bus) = app_with(VitalsAnalyzer::untrained());
    let user = json!({ "email": "ana@example.com", "password": "s3cret", "name": "Ana" });

    let (status, body) = send(&app, "POST", "/register", Some(user.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "success", "message": "User created", "name": "Ana" })
    );

    let (status, body) = send(&app, "POST", "/register", Some(user)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "detail": "Email already registered" }));
    assert_eq!(bus.of_kind(EventKind::UserRegistered).len(), 1);
}

#[tokio::test]
async fn register_reports_store_failure_as_server_error() {
    let store = Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
    store.close().unwrap();
    let (app, bus) = app_with_store(VitalsAnalyzer::untrained(), store);

    let (status, body) = send(
        &app,
        "POST",
        "/register",
        Some(json!({ "email": "ana@example.com", "password": "s3cret", "name": "Ana" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "detail": "credential store is closed" }));
    assert!(bus.of_kind(EventKind::UserRegistered).is_empty());
}

#[tokio::test]
async fn login_checks_password() {
    let (app, bus) = app_with(VitalsAnalyzer::untrained());
    send(
        &app,
        "POST",
        "/register",
        Some(json!({ "email": "ana@example.com", "password": "s3cret", "name": "Ana" })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/login",
        Some(json!({ "email": "ana@example.com", "password": "s3cret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success", "name": "Ana" }));

    for credentials in [
        json!({ "email": "ana@example.com", "password": "wrong" }),
        json!({ "email": "nobody@example.com", "password": "s3cret" }),
    ] {
        let (status, body) = send(&app, "POST", "/login", Some(credentials)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid email or password");
    }
    assert_eq!(bus.of_kind(EventKind::LoginFailed).len(), 2);
}

#[tokio::test]
async fn analyze_without_model_requests_training() {
    let (app, bus) = app_with(VitalsAnalyzer::untrained());
    for reading in [
        json!({ "heart_rate": 75.0, "blood_oxygen": 98.0, "activity_level": "low" }),
        json!({ "heart_rate": 190.0, "blood_oxygen": 70.0, "activity_level": "low" }),
    ] {
        let (status, body) = send(&app, "POST", "/analyze", Some(reading)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "is_anomaly": false, "recommendation": "System needs training" })
        );
    }
    assert!(bus.snapshot().is_empty());
}

#[tokio::test]
async fn analyze_applies_recommendation_cascade() {
    let (app, bus) = app_with(VitalsAnalyzer::with_detector(AlwaysOutlier));
    let cases = [
        (
            json!({ "heart_rate": 130.0, "blood_oxygen": 85.0, "activity_level": "low" }),
            "CRITICAL: Tachycardia at rest. Sit down immediately.",
        ),
        (
            json!({ "heart_rate": 150.0, "blood_oxygen": 85.0, "activity_level": "high" }),
            "CRITICAL: Hypoxia detected. Seek oxygen/medical help.",
        ),
        (
            json!({ "heart_rate": 130.0, "blood_oxygen": 95.0, "activity_level": "running" }),
            "Irregular rhythm detected. Consult a cardiologist.",
        ),
    ];
    for (reading, expected) in cases {
        let (status, body) = send(&app, "POST", "/analyze", Some(reading)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_anomaly"], true);
        assert_eq!(body["recommendation"], expected);
    }
    assert_eq!(bus.of_kind(EventKind::AnomalyDetected).len(), 3);
}

#[tokio::test]
async fn analyze_with_trained_model_keeps_baseline_stable() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        output: dir.path().join("health_model.json"),
        ..TrainingConfig::default()
    };
    TrainingPipeline.run(&config).unwrap();
    let analyzer = VitalsAnalyzer::from_artifact_path(&config.output).unwrap();
    let (app, _) = app_with(analyzer);

    let (status, body) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "heart_rate": 75.0, "blood_oxygen": 98.0, "activity_level": "low" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "is_anomaly": false, "recommendation": "Vitals stable." })
    );
}

#[tokio::test]
async fn analyze_coerces_numeric_strings() {
    let (app, bus) = app_with(VitalsAnalyzer::with_detector(AlwaysOutlier));
    let (status, body) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "heart_rate": "130", "blood_oxygen": "95", "activity_level": "low" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["recommendation"],
        "CRITICAL: Tachycardia at rest. Sit down immediately."
    );
    let event = &bus.of_kind(EventKind::AnomalyDetected)[0];
    assert_eq!(event.payload["heart_rate"], 130.0);

    let (app, _) = app_with(VitalsAnalyzer::untrained());
    let (status, body) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "heart_rate": "75", "blood_oxygen": "98", "activity_level": "low" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommendation"], "System needs training");
}

#[tokio::test]
async fn malformed_body_is_rejected_by_extractor() {
    let (app, _) = app_with(VitalsAnalyzer::untrained());
    let (status, _) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "heart_rate": "fast", "activity_level": "low" })),
    )
    .await;
    assert!(status.is_client_error());
}
