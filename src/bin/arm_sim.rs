//! Simulated bionic arm.
//!
//! Runs the motion engine without hardware: plays a tour of the preset
//! gestures (or a stored sequence), optionally records the motion, and
//! reports telemetry to the log or to a MoQ relay for browser monitoring.
//!
//! Usage:
//!   arm-sim [options]
//!
//! Examples:
//!   # Tour the presets twice at full speed
//!   arm-sim --speed 100 --loops 2
//!
//!   # Run a stored sequence and publish telemetry
//!   arm-sim --gestures gestures.json --sequences sequences.json \
//!           --sequence "Wave hello" --moq-relay https://cdn.moq.dev

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bionic_arm::{
    presets, ArmEngine, Calibration, EngineConfig, GestureCatalog, GestureRecord, LogSink,
    SequenceOutcome, SequenceRecord, SequenceSpec, SequenceStep, TelemetryChannel,
    TelemetryEvent, TelemetrySink,
};

/// Simulated bionic arm - plays gestures and reports telemetry
#[derive(Parser, Debug)]
#[command(name = "arm-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Engine config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Motor speed in percent (10-100), overrides the config file
    #[arg(short, long)]
    speed: Option<u8>,

    /// Gesture records to load (JSON array)
    #[arg(long)]
    gestures: Option<PathBuf>,

    /// Sequence records to load (JSON array)
    #[arg(long)]
    sequences: Option<PathBuf>,

    /// Sequence to run, by id or name (default: preset tour)
    #[arg(long)]
    sequence: Option<String>,

    /// Loop count for the preset tour
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Pause after each preset of the tour, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pause_ms: u64,

    /// Record the motion and print it as a gesture record
    #[arg(long)]
    record: bool,

    /// Run a calibration cycle after the motion
    #[arg(long)]
    calibrate: bool,

    /// MoQ relay URL for telemetry (default: log only)
    #[arg(long)]
    moq_relay: Option<String>,

    /// MoQ base path; telemetry goes to <path>/state
    #[arg(long, default_value = "anon/bionic-arm")]
    moq_path: String,

    /// Disable TLS verification for MoQ
    #[arg(long)]
    moq_insecure: bool,
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn log_telemetry(
    mut rx: mpsc::Receiver<TelemetryEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => LogSink.emit(event),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(feature = "moq")]
async fn spawn_telemetry(
    args: &Args,
    rx: mpsc::Receiver<TelemetryEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let Some(relay) = args.moq_relay.as_deref() else {
        return log_telemetry(rx, cancel);
    };
    let mut builder = bionic_arm::TelemetryPublisherBuilder::new()
        .relay(relay)
        .path(&args.moq_path);
    if args.moq_insecure {
        builder = builder.disable_tls_verify();
    }
    match builder.connect().await {
        Ok(publisher) => tokio::spawn(publisher.forward(rx, cancel)),
        Err(e) => {
            tracing::warn!("MoQ connect failed (continuing without): {}", e);
            log_telemetry(rx, cancel)
        }
    }
}

#[cfg(not(feature = "moq"))]
async fn spawn_telemetry(
    args: &Args,
    rx: mpsc::Receiver<TelemetryEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    if args.moq_relay.is_some() {
        tracing::warn!("Built without the `moq` feature, logging telemetry instead");
    }
    log_telemetry(rx, cancel)
}

fn preset_tour(loops: u32, pause: Duration) -> Result<SequenceSpec> {
    let steps = presets::all()
        .into_iter()
        .map(|(_, pose)| SequenceStep::new(pose, pause))
        .collect();
    Ok(SequenceSpec::new(steps, loops)?)
}

fn find_sequence<'a>(records: &'a [SequenceRecord], key: &str) -> Option<&'a SequenceRecord> {
    records
        .iter()
        .find(|s| s.id == key)
        .or_else(|| records.iter().find(|s| s.name.eq_ignore_ascii_case(key)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bionic_arm=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(speed) = args.speed {
        config.motor_speed = speed;
    }
    let config = config.normalized();

    let mut catalog = GestureCatalog::with_presets();
    if let Some(path) = &args.gestures {
        let records: Vec<GestureRecord> = load_json(path)?;
        tracing::info!("Loaded {} gestures from {}", records.len(), path.display());
        catalog.extend(records);
    }
    let sequences: Vec<SequenceRecord> = match &args.sequences {
        Some(path) => load_json(path)?,
        None => Vec::new(),
    };

    let spec = match &args.sequence {
        Some(key) => {
            let record = find_sequence(&sequences, key)
                .ok_or_else(|| anyhow::anyhow!("no sequence with id or name '{}'", key))?;
            SequenceSpec::from_record(record, &catalog)?
        }
        None => preset_tour(args.loops, Duration::from_millis(args.pause_ms))?,
    };

    let cancel = CancellationToken::new();
    let (channel, rx) = TelemetryChannel::new(config.telemetry_buffer);
    let telemetry_task = spawn_telemetry(&args, rx, cancel.clone()).await;
    let engine = ArmEngine::new(config.clone(), Arc::new(channel));

    println!();
    println!("========================================");
    println!("Bionic Arm Simulator");
    println!("========================================");
    println!("Speed:     {}%", engine.speed());
    println!("Gestures:  {}", catalog.len());
    println!(
        "Motion:    {} gestures x {} loops",
        spec.steps.len(),
        spec.loop_count
    );
    match &args.moq_relay {
        Some(relay) => println!("Telemetry: {} ({}/state)", relay, args.moq_path),
        None => println!("Telemetry: log"),
    }
    println!("========================================");
    println!();

    // Ctrl+C cuts power: motion stops between steps and the arm holds.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C, powering off");
                engine.set_power(false);
            }
        });
    }

    let recording = if args.record {
        engine.start_recording().await
    } else {
        None
    };

    match engine.play_sequence(&spec).await? {
        SequenceOutcome::Completed { plays } => println!("Completed {} gestures", plays),
        SequenceOutcome::Cancelled { plays } => {
            println!("Interrupted after {} of {} gestures", plays, spec.total_plays())
        }
        SequenceOutcome::GateClosed => println!("Arm is powered off"),
    }

    if let Some(handle) = recording {
        let recording = engine.stop_recording(handle).await;
        match recording.to_record("recorded-1", "Recorded motion", "Captured by arm-sim") {
            Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            Err(e) => tracing::warn!("Recording not saved: {}", e),
        }
    }

    if args.calibrate {
        match engine.calibrate().await {
            Calibration::Completed { count } => println!("Calibration #{} done", count),
            Calibration::Interrupted => println!("Calibration interrupted"),
            Calibration::GateClosed => println!("Calibration skipped: powered off"),
        }
    }

    let pose = engine.snapshot();
    let forces = engine.forces();
    println!();
    println!("Pose:  {:?}", pose.to_array());
    println!("Grip:  {} ({:?})", forces.grip, forces.grip_level());
    if forces.is_strong_grip() {
        println!("       strong grip detected");
    }
    for d in engine.diagnostics() {
        println!("[{:>7}] {}: {}", d.status.to_string(), d.component, d.message);
    }

    // Queued events are drained before the cancel is seen.
    cancel.cancel();
    if let Err(e) = telemetry_task.await {
        tracing::warn!("Telemetry task failed: {}", e);
    }

    Ok(())
}
