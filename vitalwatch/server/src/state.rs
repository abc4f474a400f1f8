use std::sync::Arc;

use vitalwatch_model::{VitalsAnalyzer, VitalsTelemetry};

use crate::credentials::CredentialStore;

/// Dependencies shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Read-only scoring service.
    pub analyzer: Arc<VitalsAnalyzer>,
    /// Credential persistence.
    pub credentials: Arc<dyn CredentialStore>,
    /// Structured logs and domain events.
    pub telemetry: VitalsTelemetry,
}

impl AppState {
    /// Bundles the service dependencies.
    #[must_use]
    pub fn new(
        analyzer: VitalsAnalyzer,
        credentials: Arc<dyn CredentialStore>,
        telemetry: VitalsTelemetry,
    ) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            credentials,
            telemetry,
        }
    }
}
