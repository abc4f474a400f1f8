use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_event_bus::{EventKind, FileEventPublisher};
use shared_logging::LogLevel;
use uuid::Uuid;
use vitalwatch_model::{
    resolve_model_path, ActivityLevel, ForestParams, ModelArtifact, Reading, SyntheticConfig,
    TrainingConfig, TrainingPipeline, VitalsAnalyzer, VitalsTelemetry, FALLBACK_MODEL_PATH,
    PRIMARY_MODEL_PATH,
};

const DEFAULT_MANIFEST: &str = "../model_data/jobs/index.jsonl";
const DEFAULT_LOG_DIR: &str = "../model_data/logs";

#[derive(Parser, Debug)]
#[command(name = "vtrain", version, about = "VitalWatch anomaly model trainer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generates synthetic readings, fits the model, and writes the artifact.
    Run(RunArgs),
    /// Lists most recent training jobs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows the manifest entry for a job id.
    Status {
        job_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Prints metadata of a model artifact.
    Inspect {
        /// Artifact path; defaults to the service's lookup order.
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Scores a single reading against an artifact.
    Score(ScoreArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of synthetic samples.
    #[arg(long, default_value_t = SyntheticConfig::default().samples)]
    samples: usize,
    /// Seed for data generation and tree construction.
    #[arg(long, default_value_t = SyntheticConfig::default().seed)]
    seed: u64,
    /// Number of trees.
    #[arg(long, default_value_t = ForestParams::default().n_estimators)]
    trees: usize,
    /// Expected outlier fraction.
    #[arg(long, default_value_t = ForestParams::default().contamination)]
    contamination: f64,
    #[arg(long, default_value = PRIMARY_MODEL_PATH)]
    output: PathBuf,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

impl RunArgs {
    fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            data: SyntheticConfig {
                samples: self.samples,
                seed: self.seed,
            },
            forest: ForestParams {
                n_estimators: self.trees,
                contamination: self.contamination,
                seed: self.seed,
                ..ForestParams::default()
            },
            output: self.output.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ScoreArgs {
    #[arg(long)]
    heart_rate: f64,
    #[arg(long)]
    blood_oxygen: f64,
    /// `low`, `moderate` or `high`.
    #[arg(long, default_value = "low")]
    activity: String,
    #[arg(long)]
    model: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct JobManifestEntry {
    job_id: String,
    submitted_at: DateTime<Utc>,
    output: PathBuf,
    samples: usize,
    seed: u64,
    trees: usize,
    contamination: f64,
    log_path: PathBuf,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JobManifestEntry {
    fn new(args: &RunArgs, log_path: PathBuf) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            output: args.output.clone(),
            samples: args.samples,
            seed: args.seed,
            trees: args.trees,
            contamination: args.contamination,
            log_path,
            status: "queued".into(),
            error: None,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vtrain=info,shared_logging=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::List { limit, manifest } => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | samples={} seed={} | {}",
                    entry.job_id,
                    entry.status,
                    entry.submitted_at,
                    entry.samples,
                    entry.seed,
                    entry.output.display()
                );
            }
            Ok(())
        }
        Commands::Status { job_id, manifest } => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.job_id == job_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("job {job_id} not found");
            }
            Ok(())
        }
        Commands::Inspect { model } => {
            let path = model.unwrap_or_else(default_model_path);
            let artifact = ModelArtifact::load(&path)
                .with_context(|| format!("loading model artifact {}", path.display()))?;
            let summary = json!({
                "path": path,
                "format_version": artifact.format_version,
                "feature_names": artifact.feature_names,
                "trained_at": artifact.trained_at,
                "training": artifact.training,
                "stats": artifact.stats,
                "n_estimators": artifact.forest.n_estimators(),
                "sample_size": artifact.forest.sample_size(),
                "contamination": artifact.forest.params().contamination,
                "offset": artifact.forest.offset(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Score(args) => handle_score(&args),
    }
}

fn default_model_path() -> PathBuf {
    resolve_model_path(Path::new(PRIMARY_MODEL_PATH), Path::new(FALLBACK_MODEL_PATH))
}

fn handle_score(args: &ScoreArgs) -> Result<()> {
    let path = args.model.clone().unwrap_or_else(default_model_path);
    let analyzer = match VitalsAnalyzer::from_artifact_path(&path) {
        Ok(analyzer) => analyzer,
        Err(err) => {
            eprintln!("warning: model unavailable at {}: {err}", path.display());
            VitalsAnalyzer::untrained()
        }
    };
    let reading = Reading::new(
        args.heart_rate,
        args.blood_oxygen,
        ActivityLevel::from_label(&args.activity),
    );
    let assessment = analyzer.analyze(&reading);
    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}

fn handle_run(args: &RunArgs) -> Result<()> {
    let log_path = compute_log_path(&args.log_dir)?;
    let entry = JobManifestEntry::new(args, log_path.clone());
    append_manifest(&args.manifest, &entry)?;

    let mut builder = VitalsTelemetry::builder("vtrain").log_path(&log_path);
    if let Some(path) = &args.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = builder.build()?;

    update_status(&args.manifest, &entry.job_id, "running", None)?;
    telemetry.log(
        LogLevel::Info,
        "job started",
        json!({ "job_id": entry.job_id, "samples": args.samples, "seed": args.seed }),
    )?;
    telemetry.event(
        EventKind::TrainingStarted,
        json!({ "job_id": entry.job_id, "output": args.output }),
    )?;

    match TrainingPipeline.run_with_telemetry(&args.training_config(), Some(&telemetry)) {
        Ok(report) => {
            update_status(&args.manifest, &entry.job_id, "completed", None)?;
            telemetry.log(
                LogLevel::Info,
                "job completed",
                json!({ "job_id": entry.job_id, "summary": report.summary() }),
            )?;
            let output = json!({ "job_id": entry.job_id, "report": report });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            let message = format!("{err:#}");
            update_status(
                &args.manifest,
                &entry.job_id,
                "failed",
                Some(message.clone()),
            )?;
            telemetry.log(
                LogLevel::Error,
                "job failed",
                json!({ "job_id": entry.job_id, "error": message }),
            )?;
            telemetry.event(
                EventKind::TrainingFailed,
                json!({ "job_id": entry.job_id, "error": message }),
            )?;
            Err(err)
        }
    }
}

fn append_manifest(path: &Path, entry: &JobManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<JobManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir).with_context(|| format!("creating log directory {}", dir.display()))?;
    Ok(dir.join(format!(
        "train-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn update_status(path: &Path, job_id: &str, status: &str, error: Option<String>) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let Some(entry) = entries.iter_mut().find(|entry| entry.job_id == job_id) else {
        return Ok(());
    };
    entry.status = status.to_string();
    entry.error = error;
    let mut file =
        File::create(path).with_context(|| format!("rewriting manifest {}", path.display()))?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_args(dir: &Path) -> RunArgs {
        RunArgs {
            samples: 400,
            seed: 42,
            trees: 20,
            contamination: 0.05,
            output: dir.join("model_data/health_model.json"),
            log_dir: dir.join("logs"),
            manifest: dir.join("jobs/index.jsonl"),
            event_log: Some(dir.join("events.jsonl")),
        }
    }

    #[test]
    fn cli_parses_run_defaults() {
        let cli = Cli::try_parse_from(["vtrain", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.samples, 3000);
        assert_eq!(args.seed, 42);
        assert_eq!(args.trees, 100);
        assert_eq!(args.output, PathBuf::from(PRIMARY_MODEL_PATH));
    }

    #[test]
    fn run_records_completed_job() {
        let dir = tempdir().unwrap();
        let args = run_args(dir.path());
        handle_run(&args).unwrap();
        let entries = read_manifest(&args.manifest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "completed");
        assert!(args.output.exists());
        let events = fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert!(events.contains("training.started"));
        assert!(events.contains("training.completed"));
    }

    #[test]
    fn run_marks_failed_job_when_output_unwritable() {
        let dir = tempdir().unwrap();
        let mut args = run_args(dir.path());
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        args.output = blocker.join("health_model.json");
        assert!(handle_run(&args).is_err());
        let entries = read_manifest(&args.manifest).unwrap();
        assert_eq!(entries[0].status, "failed");
        assert!(entries[0].error.as_deref().unwrap().contains("saving model artifact"));
    }

    #[test]
    fn update_status_ignores_unknown_job() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("index.jsonl");
        update_status(&manifest, "job-missing", "running", None).unwrap();
        assert!(read_manifest(&manifest).unwrap().is_empty());
    }
}
