// src/main.rs
use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::api::connector::PredictorApi;
use crate::api::remote::{get_server_url, RemotePredictor};
use crate::capture::camera::{default_backend, get_camera_device};
use crate::controller::{format_accuracy, CaptureController, ImageSource, ResultView, ALERT_NO_PREDICTION_ID};

mod api;
mod capture;
mod controller;
mod gui;

#[derive(Parser)]
#[command(name = "leafcheck")]
#[command(about = "Upload or capture a leaf photo and classify it with a remote disease detector", long_about = None)]
struct Cli {
    /// Prediction service URL (default: $LEAFCHECK_SERVER or http://localhost:8000)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the graphical capture-and-predict window
    Gui {
        /// Camera device (default: $LEAFCHECK_CAMERA or /dev/video0)
        #[arg(long)]
        camera_device: Option<String>,
    },
    /// Classify an image file
    Predict {
        /// Image to upload
        file: PathBuf,

        /// Send a correction for the prediction right away
        #[arg(long)]
        correct: Option<String>,
    },
    /// Take one camera snapshot and classify it
    Capture {
        /// Camera device (default: $LEAFCHECK_CAMERA or /dev/video0)
        #[arg(long)]
        camera_device: Option<String>,

        /// Also write the captured JPEG here
        #[arg(long)]
        save: Option<PathBuf>,

        /// Milliseconds to let the camera settle before the snapshot
        #[arg(long, default_value_t = 1500)]
        warmup_ms: u64,
    },
    /// Report the correct label for an earlier prediction
    Feedback {
        /// Prediction id returned by the service
        id: String,

        /// The correct class name
        true_label: String,

        /// Label the service predicted
        #[arg(long)]
        predicted: String,
    },
    /// Show service-wide prediction statistics
    Stats,
    /// Show per-class accuracy, confidence bands and inference times
    DetailedStats,
    /// Show accuracy and feedback coverage of the deployed model
    ModelPerformance,
    /// List recent predictions
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the deployed model
    ModelInfo,
    /// Download the prediction log as CSV
    ExportCsv {
        /// Output file (stdout if omitted)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Check that the prediction service answers
    CheckServer,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info")
    );

    let cli = Cli::parse();
    let server_url = get_server_url(cli.server);
    let timeout = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        Commands::Gui { camera_device } => {
            gui::run_gui(&server_url, timeout, &get_camera_device(camera_device))
        }
        Commands::Predict { file, correct } => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            run_predict(&api, &file, correct.as_deref())
        }
        Commands::Capture { camera_device, save, warmup_ms } => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            run_capture(&api, &get_camera_device(camera_device), save, Duration::from_millis(warmup_ms))
        }
        Commands::Feedback { id, true_label, predicted } => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            run_feedback(&api, &id, &true_label, &predicted)
        }
        Commands::Stats => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            show_stats(&api)
        }
        Commands::DetailedStats => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            show_detailed_stats(&api)
        }
        Commands::ModelPerformance => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            show_model_performance(&api)
        }
        Commands::History { limit } => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            show_history(&api, limit)
        }
        Commands::ModelInfo => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            show_model_info(&api)
        }
        Commands::ExportCsv { output } => {
            let api = RemotePredictor::new(&server_url, timeout)?;
            export_csv(&api, output)
        }
        Commands::CheckServer => {
            check_server(&server_url, timeout)
        }
    }
}

/// Print queued alerts. Returns the first one so callers can fail on the root cause.
fn drain_alerts(controller: &mut CaptureController) -> Option<String> {
    let mut first = None;
    while let Some(alert) = controller.take_alert() {
        println!("! {}", alert);
        first.get_or_insert(alert);
    }
    first
}

fn print_result(result: &ResultView) {
    println!("\n=== Prediction ===");
    println!("Label:      {}", result.label);
    println!("Confidence: {}", result.confidence_text);
    if let Some(version) = &result.model_version {
        println!("Model:      {}", version);
    }
    if let Some(ms) = result.inference_time_ms {
        println!("Inference:  {:.1} ms", ms);
    }
    if let Some(id) = &result.prediction_id {
        println!("Id:         {}", id);
    }
    if result.low_warning_visible {
        println!("Warning: low confidence, consider retaking the photo");
    }
    println!("==================\n");
}

fn run_predict(api: &dyn PredictorApi, file: &Path, correct: Option<&str>) -> Result<()> {
    info!("Classifying {}", file.display());

    let mut controller = CaptureController::new();
    controller.select_file(file);
    controller.predict(api);
    finish_headless(&mut controller, api, correct)
}

fn run_capture(api: &dyn PredictorApi, device: &str, save: Option<PathBuf>, warmup: Duration) -> Result<()> {
    let backend = default_backend(device);
    let mut controller = CaptureController::new();

    controller.toggle_camera(backend.as_ref());
    if let Some(alert) = drain_alerts(&mut controller) {
        return Err(anyhow!(alert));
    }

    let started = Instant::now();
    while started.elapsed() < warmup {
        controller.poll_camera();
        std::thread::sleep(Duration::from_millis(30));
    }
    controller.capture();

    if let Some(path) = &save {
        if let Some(ImageSource::CapturedFrame { bytes }) = controller.image_source() {
            std::fs::write(path, bytes)?;
            info!("Snapshot saved to: {}", path.display());
        }
    }

    controller.predict(api);
    finish_headless(&mut controller, api, None)
}

fn finish_headless(controller: &mut CaptureController, api: &dyn PredictorApi, correct: Option<&str>) -> Result<()> {
    if let Some(alert) = drain_alerts(controller) {
        return Err(anyhow!(alert));
    }
    if let Some(result) = controller.result() {
        print_result(result);
    }
    if let Some(label) = correct {
        let recorded = controller.submit_feedback(api, label);
        let alert = drain_alerts(controller);
        if !recorded {
            return Err(anyhow!(alert.unwrap_or_else(|| EMPTY_LABEL.to_string())));
        }
    }
    Ok(())
}

const EMPTY_LABEL: &str = "The correct label must not be empty";

fn run_feedback(api: &dyn PredictorApi, id: &str, true_label: &str, predicted: &str) -> Result<()> {
    let id = id.trim();
    if id.is_empty() {
        return Err(anyhow!(ALERT_NO_PREDICTION_ID));
    }
    let true_label = true_label.trim();
    if true_label.is_empty() {
        return Err(anyhow!(EMPTY_LABEL));
    }

    let response = api.send_feedback(id, true_label, predicted.trim())?;
    println!("Feedback recorded. Current accuracy: {}", format_accuracy(response.accuracy));
    Ok(())
}

/// Render a service timestamp (naive UTC, ISO 8601) in local time
fn format_timestamp(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| {
            Utc.from_utc_datetime(&naive)
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

fn show_stats(api: &RemotePredictor) -> Result<()> {
    let stats = api.stats()?;

    println!("\nService statistics ({})", api.base_url());
    if let Some(version) = &stats.model_version {
        println!("  Model:              {}", version);
    }
    println!("  Total predictions:  {}", stats.total_predictions);
    println!("  Accuracy:           {}", format_accuracy(stats.accuracy));
    println!("  Avg confidence:     {:.2}", stats.avg_confidence);
    println!("  Health score:       {}", stats.health_score);
    if !stats.class_distribution.is_empty() {
        println!("\n  Class distribution:");
        for (label, count) in &stats.class_distribution {
            println!("    - {} ({})", label, count);
        }
    }
    println!();
    Ok(())
}

fn show_detailed_stats(api: &RemotePredictor) -> Result<()> {
    let stats = api.detailed_stats()?;
    let summary = &stats.summary;
    let times = &summary.inference_time_ms;
    let bands = &summary.confidence_distribution;

    println!("\nDetailed statistics ({})", api.base_url());
    println!("  With feedback:      {}", summary.total_with_feedback);
    println!("  Inference time:     min {:.2} ms, avg {:.2} ms, max {:.2} ms", times.min, times.avg, times.max);
    println!("  Confidence >= 90%:  {}", bands.high_90_to_100);
    println!("  Confidence 70-90%:  {}", bands.medium_70_to_90);
    println!("  Confidence < 70%:   {}", bands.low_below_70);

    if stats.class_statistics.is_empty() {
        println!("\n  No feedback received yet");
    } else {
        println!("\n  Per class (feedback only):");
        for class in &stats.class_statistics {
            println!(
                "    - {:<16} {:>3}/{:<3} correct  {:>6.2}%  avg conf {:.2}",
                class.class_name, class.correct, class.total, class.accuracy, class.avg_confidence
            );
        }
    }
    println!();
    Ok(())
}

fn show_model_performance(api: &RemotePredictor) -> Result<()> {
    let perf = api.model_performance()?;

    println!("\nModel performance ({})", api.base_url());
    println!("  Total predictions:  {}", perf.total_predictions);
    println!("  With feedback:      {} ({:.2}%)", perf.predictions_with_feedback, perf.feedback_rate);
    println!("  Correct:            {}", perf.correct_predictions);
    println!("  Accuracy:           {:.2}%", perf.accuracy_percent);
    println!("  Avg confidence:     {:.2}%", perf.avg_confidence_percent);
    println!("  Avg inference time: {:.2} ms", perf.avg_inference_time_ms);
    println!();
    Ok(())
}

fn show_history(api: &RemotePredictor, limit: usize) -> Result<()> {
    let rows = api.history()?;
    if rows.is_empty() {
        println!("No predictions recorded yet");
        return Ok(());
    }

    println!("\nRecent predictions:");
    for row in rows.iter().take(limit) {
        let when = row.created_at.as_deref().map(format_timestamp).unwrap_or_default();
        let verdict = match (&row.true_label, row.is_correct) {
            (Some(label), Some(1)) => format!("confirmed {}", label),
            (Some(label), _) => format!("corrected to {}", label),
            _ => String::new(),
        };
        let took = row.inference_time.map(|ms| format!("{:.0} ms", ms)).unwrap_or_default();
        println!(
            "  #{:<5} {:<16} {:<14} {:>6.2} {:>7}  {}",
            row.id, when, row.predicted_label, row.confidence, took, verdict
        );
    }
    println!();
    Ok(())
}

fn show_model_info(api: &RemotePredictor) -> Result<()> {
    let info = api.model_info()?;

    println!("\nModel {}", info.model_version);
    if let Some(architecture) = &info.architecture {
        println!("  Architecture: {}", architecture);
    }
    if let Some(format) = &info.format {
        println!("  Format:       {}", format);
    }
    if !info.input_shape.is_empty() {
        println!("  Input shape:  {:?}", info.input_shape);
    }
    println!("  Quantized:    {}", info.quantized);
    if let Some(dataset) = &info.dataset {
        println!("  Dataset:      {}", dataset);
    }
    if let Some(engine) = &info.inference_engine {
        println!("  Engine:       {}", engine);
    }
    if info.demo_mode {
        warn!("Service is running in demo mode, predictions are random");
    }
    println!("  Classes:");
    for class in &info.classes {
        println!("    - {}", class);
    }
    println!();
    Ok(())
}

fn export_csv(api: &RemotePredictor, output: Option<PathBuf>) -> Result<()> {
    let csv = api.export_csv()?;
    match output {
        Some(path) => {
            std::fs::write(&path, csv)?;
            info!("Prediction log written to: {}", path.display());
        }
        None => print!("{}", csv),
    }
    Ok(())
}

fn check_server(server_url: &str, timeout: Duration) -> Result<()> {
    info!("Checking prediction service at {}...", server_url);
    let api = RemotePredictor::new(server_url, timeout)?;

    match api.model_info() {
        Ok(info) => {
            println!("✓ Prediction service is running at {}", api.base_url());
            println!("✓ Model {} with {} class(es)", info.model_version, info.classes.len());
        }
        Err(e) => {
            error!("Service check failed: {:#}", e);
            println!("✗ Could not reach the prediction service at {}", api.base_url());
            println!("  Error: {:#}", e);
            println!("\nTroubleshooting:");
            println!("  1. Start the service: uvicorn app:app --host 0.0.0.0 --port 8000");
            println!("  2. Point the client at it: --server http://<host>:8000");
        }
    }
    Ok(())
}
