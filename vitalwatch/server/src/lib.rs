#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! VitalWatch HTTP service: account registration, login, and vital-sign
//! analysis backed by a trained outlier model.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Server settings and overrides.
pub mod config;

/// Credential persistence.
pub mod credentials;

/// HTTP error mapping.
pub mod error;

/// Request handlers.
pub mod routes;

/// Shared handler state.
pub mod state;

pub use config::{ConfigError, ServerConfig};
pub use credentials::{CredentialError, CredentialStore, SqliteCredentialStore};
pub use error::ApiError;
pub use state::AppState;

/// Builds the application router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::health))
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .route("/analyze", post(routes::analyze))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
