use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitalwatch_model::{VitalsAnalyzer, VitalsTelemetry};
use vitalwatch_server::{router, AppState, CredentialStore, ServerConfig, SqliteCredentialStore};

#[derive(Parser, Debug)]
#[command(name = "vitalwatch-server", version, about = "VitalWatch HTTP API")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "VITALWATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vitalwatch_server=info,shared_logging=info,tower_http=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let mut telemetry =
        VitalsTelemetry::builder("vitalwatch-server").log_path_opt(config.log_path.clone());
    if let Some(path) = &config.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = telemetry.build().context("initialising telemetry")?;

    let model_path = config.resolved_model_path();
    let analyzer = match VitalsAnalyzer::from_artifact_path(&model_path) {
        Ok(analyzer) => {
            telemetry.log(LogLevel::Info, "model loaded", json!({ "path": model_path }))?;
            analyzer
        }
        Err(err) => {
            telemetry.log(
                LogLevel::Warn,
                "model unavailable, analysis will report that training is required",
                json!({ "path": model_path, "error": err.to_string() }),
            )?;
            VitalsAnalyzer::untrained()
        }
    };

    let store = Arc::new(
        SqliteCredentialStore::open(&config.database_path).with_context(|| {
            format!(
                "opening credential database {}",
                config.database_path.display()
            )
        })?,
    );
    let credentials: Arc<dyn CredentialStore> = store.clone();
    let app = router(AppState::new(analyzer, credentials, telemetry.clone()));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        "vitalwatch-server v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    store.close().context("closing credential database")?;
    telemetry.log(LogLevel::Info, "server stopped", serde_json::Value::Null)?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
