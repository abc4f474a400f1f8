use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde_json::Value;
use shared_event_bus::{EventKind, EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Builder for [`VitalsTelemetry`].
pub struct VitalsTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl VitalsTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the log path when one is configured.
    #[must_use]
    pub fn log_path_opt(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<VitalsTelemetry> {
        VitalsTelemetry::new(self.module, self.log_path, self.event_publisher)
    }
}

/// Telemetry handle shared by the trainer and the scoring service.
///
/// Log records always reach `tracing`; they are also appended to a file when a
/// log path is configured. Events go to the configured publisher, if any.
#[derive(Clone)]
pub struct VitalsTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for VitalsTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VitalsTelemetry")
            .field("module", &self.inner.module)
            .field("log_path", &self.inner.logger.as_ref().map(JsonLogger::path))
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    // Only created when publishing outside of a tokio runtime.
    runtime: OnceCell<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    tracing::warn!(error = %err, "telemetry event publish failed");
                }
            });
            Ok(())
        } else {
            let runtime = self.runtime.get_or_try_init(Runtime::new)?;
            runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl VitalsTelemetry {
    fn new(
        module: impl Into<String>,
        log_path: Option<PathBuf>,
        event_publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let logger = log_path.map(JsonLogger::new).transpose()?;
        let event = event_publisher.map(|publisher| EventHandle {
            runtime: OnceCell::new(),
            publisher,
        });
        Ok(Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger,
                event,
            }),
        })
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> VitalsTelemetryBuilder {
        VitalsTelemetryBuilder::new(module)
    }

    /// Telemetry that only reaches `tracing`.
    #[must_use]
    pub fn console(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        match &self.inner.logger {
            Some(logger) => logger.log(&record),
            None => {
                record.trace();
                Ok(())
            }
        }
    }

    /// Emits an event. Inside a runtime the publish is spawned; outside it blocks until written.
    pub fn event(&self, kind: EventKind, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(&self.inner.module, kind, payload))?;
        }
        Ok(())
    }

    /// Emits an event and waits for the publisher from async code.
    pub async fn emit(&self, kind: EventKind, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle
                .publisher
                .publish(EventRecord::new(&self.inner.module, kind, payload))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vtrain.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = VitalsTelemetry::builder("vtrain")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "training.generate", json!({ "samples": 3000 }))
            .unwrap();
        telemetry
            .event(EventKind::TrainingCompleted, json!({ "offset": -0.6 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("training.generate"));
        assert_eq!(bus.of_kind(EventKind::TrainingCompleted).len(), 1);
    }

    #[tokio::test]
    async fn emit_awaits_publisher() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let telemetry = VitalsTelemetry::builder("server")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .emit(EventKind::AnomalyDetected, json!({ "heart_rate": 150.0 }))
            .await
            .unwrap();
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn console_telemetry_is_a_no_op_sink() {
        let telemetry = VitalsTelemetry::console("server");
        telemetry
            .log(LogLevel::Warn, "model missing", Value::Null)
            .unwrap();
        telemetry
            .event(EventKind::LoginFailed, json!({}))
            .unwrap();
    }
}
