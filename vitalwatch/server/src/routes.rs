use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::EventKind;
use shared_logging::LogLevel;
use vitalwatch_model::{Assessment, Reading};

use crate::{credentials::CredentialError, error::ApiError, state::AppState};

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Login identifier, matched exactly.
    pub email: String,
    /// Plaintext password; only its salted digest is stored.
    pub password: String,
    /// Display name returned on login.
    pub name: String,
}

/// Body of `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login identifier.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// `GET /`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "model_loaded": state.analyzer.is_trained(),
    }))
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    match state
        .credentials
        .register(&body.email, &body.password, &body.name)
    {
        Ok(()) => {
            publish(&state, EventKind::UserRegistered, json!({ "email": body.email })).await;
            Ok(Json(json!({
                "status": "success",
                "message": "User created",
                "name": body.name,
            })))
        }
        Err(err) => {
            if !matches!(err, CredentialError::DuplicateEmail) {
                let _ = state.telemetry.log(
                    LogLevel::Error,
                    "register failed",
                    json!({ "error": err.to_string() }),
                );
            }
            Err(err.into())
        }
    }
}

/// `POST /login`
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    match state.credentials.login(&body.email, &body.password) {
        Ok(name) => Ok(Json(json!({ "status": "success", "name": name }))),
        Err(err) => {
            let rejected = matches!(err, CredentialError::InvalidCredentials);
            let err = ApiError::from(err);
            if rejected {
                publish(&state, EventKind::LoginFailed, json!({ "email": body.email })).await;
            }
            Err(err)
        }
    }
}

/// `POST /analyze`
pub async fn analyze(
    State(state): State<AppState>,
    Json(reading): Json<Reading>,
) -> Json<Assessment> {
    let assessment = state.analyzer.analyze(&reading);
    if assessment.is_anomaly {
        publish(
            &state,
            EventKind::AnomalyDetected,
            json!({
                "heart_rate": reading.heart_rate,
                "blood_oxygen": reading.blood_oxygen,
                "activity_level": reading.activity_level,
                "recommendation": assessment.recommendation,
                "critical": assessment.recommendation.is_critical(),
            }),
        )
        .await;
    }
    Json(assessment)
}

async fn publish(state: &AppState, kind: EventKind, payload: Value) {
    if let Err(err) = state.telemetry.emit(kind, payload).await {
        tracing::warn!(error = %err, event = %kind, "event publish failed");
    }
}
