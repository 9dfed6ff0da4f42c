//! serial-scan - Capture-session core for reading device serial numbers
//!
//! Drives a bounded scan session over a stream of camera frames: frames are
//! gated against a time window and frame budget, candidate readings are
//! collected from an external recognition engine, and a deterministic
//! validator decides whether the final reading is accepted, held for manual
//! confirmation, or rejected.

mod adapter;
mod config;
mod scanner;
mod session;
mod validate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::adapter::{
    CapturedFrame, GatewayResponse, Observation, RecognitionAdapter, RecognitionRequest,
    SerialSubmission, SubmissionGateway,
};
use crate::config::ScanConfig;
use crate::scanner::{ScanEvent, Scanner};
use crate::session::SessionPhase;

/// serial-scan - scan-session core demo harness
#[derive(Parser, Debug)]
#[command(name = "serial-scan")]
#[command(about = "Capture-session core for reading device serial numbers")]
struct Args {
    /// Path to a TOML configuration file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Automatically confirm borderline readings in the demo run
    #[arg(long)]
    auto_confirm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref());

    if args.show_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("serial-scan starting (demo frame source)");
    run_demo(config, args.auto_confirm).await
}

/// Load configuration from file or create default
fn load_or_create_config(path: Option<&std::path::Path>) -> ScanConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                tracing::warn!("Failed to load {:?}: {}", path, e);
            }
        }
    } else if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }
    info!("Using default configuration");
    ScanConfig::default()
}

/// Run one scripted scan session against the demo engine
async fn run_demo(config: ScanConfig, auto_confirm: bool) -> Result<()> {
    let adapter = Arc::new(DemoAdapter::new(vec![
        vec![],
        vec![Observation {
            text: "c02 abcd".to_string(),
            confidence: 0.35,
        }],
        vec![Observation {
            text: "C02AB0DEFGH1".to_string(),
            confidence: 0.78,
        }],
        vec![Observation {
            text: "C02ABCDEFGHJ".to_string(),
            confidence: 0.93,
        }],
    ]));
    let gateway = Arc::new(LoggingGateway);

    let (scanner, events) = Scanner::new(config, adapter, gateway)?;
    scanner.start()?;

    // Feed synthetic frames at a camera-ish rate until the session ends.
    while scanner.phase() == SessionPhase::Scanning {
        scanner.submit_frame(CapturedFrame::new(vec![0u8; 64], 8, 8));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Give the worker a moment to drain, then walk the events.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for event in events.try_iter() {
        match event {
            ScanEvent::FrameObserved {
                sequence,
                best_confidence,
            } => info!(sequence, best_confidence, "candidate collected"),
            ScanEvent::EarlyStop { sequence } => info!(sequence, "early stop"),
            ScanEvent::ConfirmationRequired { serial, confidence } => {
                info!(serial = %serial, confidence, "confirmation required");
            }
            ScanEvent::SessionCompleted { outcome } => {
                info!(level = ?outcome.level, reason = ?outcome.reason, "session completed");
            }
            ScanEvent::SerialSubmitted { serial, message } => {
                info!(serial = %serial, message = %message, "submitted");
            }
            other => info!(?other, "event"),
        }
    }

    if scanner.phase() == SessionPhase::AwaitingConfirmation {
        if auto_confirm {
            let response = scanner.confirm().await?;
            info!(message = %response.message, "borderline reading confirmed");
        } else {
            scanner.deny()?;
            info!("borderline reading denied (run with --auto-confirm to submit)");
        }
    }

    if let Some(serial) = scanner.last_serial() {
        info!(serial = %serial, "last corrected serial");
    }

    info!("serial-scan demo complete");
    Ok(())
}

/// Demo recognition engine replaying a fixed script of observations
struct DemoAdapter {
    script: Mutex<std::collections::VecDeque<Vec<Observation>>>,
}

impl DemoAdapter {
    fn new(script: Vec<Vec<Observation>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl RecognitionAdapter for DemoAdapter {
    async fn recognize(&self, _request: RecognitionRequest<'_>) -> Result<Vec<Observation>> {
        // Simulate engine latency.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.script.lock().pop_front().unwrap_or_default())
    }
}

/// Demo gateway that accepts everything and logs it
struct LoggingGateway;

#[async_trait]
impl SubmissionGateway for LoggingGateway {
    async fn submit(&self, submission: SerialSubmission) -> Result<GatewayResponse> {
        info!(
            serial = %submission.serial,
            confidence = submission.confidence,
            device_type = %submission.device_type,
            source = %submission.source,
            "gateway received submission"
        );
        Ok(GatewayResponse {
            accepted: true,
            message: "stored".to_string(),
        })
    }
}
