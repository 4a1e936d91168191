//! rehab-band CLI
//!
//! Runs one control session against the synthetic curl sensor with a logging
//! actuator. Useful for checking a configuration file end to end without
//! hardware.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rehab_band::presenter::{FanOut, HistoryPresenter, LogPresenter};
use rehab_band::simulation::{CurlProfile, CurlSimulator, LoggingActuator};
use rehab_band::{ControlConfig, ControlWorker, Devices};

#[derive(Debug, Parser)]
#[command(name = "rehab-band", version, about = "Closed-loop rehab band session on a simulated sensor")]
struct Args {
    /// JSON configuration file; defaults apply to anything it omits.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Tracking cycles to run after calibration.
    #[arg(long, default_value_t = 40)]
    cycles: u64,

    /// Override the control cadence in milliseconds.
    #[arg(long, value_name = "MS")]
    cadence_ms: Option<u64>,

    /// Make every sensor read from this index onward fail.
    #[arg(long, value_name = "READ")]
    dropout_at: Option<u64>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => ControlConfig::from_json(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControlConfig::default(),
    };
    if let Some(cadence_ms) = args.cadence_ms {
        config.cadence_ms = cadence_ms;
    }
    config.validate().context("invalid configuration")?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut sensor = CurlSimulator::new(CurlProfile {
        step_ms: config.cadence_ms,
        ..CurlProfile::default()
    });
    if let Some(read) = args.dropout_at {
        sensor = sensor.failing_from(read);
    }

    let history = HistoryPresenter::default();
    let plot = history.view();
    let devices = Devices::new(sensor, LoggingActuator::default())
        .with_presenter(FanOut::new().with(LogPresenter).with(history));

    let cadence = config.cadence();
    let worker = ControlWorker::spawn(config, devices)?;
    let mut snapshots = worker.snapshots();

    let profile = worker.start_calibration().context("calibration")?;
    info!(
        min = profile.min_flexion(),
        max = profile.max_flexion(),
        "tracking started"
    );

    let started = Instant::now();
    let mut seen = 0;
    while seen < args.cycles {
        if let Some(snapshot) = snapshots.take_new() {
            if snapshot.is_terminal() {
                break;
            }
            if snapshot.raw_angle.is_some() || snapshot.faults.sensor_read_error {
                seen += 1;
            }
        }
        thread::sleep(cadence / 4);
    }

    worker.stop_tracking()?;
    let report = worker.join().context("session ended abnormally")?;

    let series = plot.angle_series();
    println!(
        "session finished after {:.1}s: {} reps, {} cycles ({} failed reads), mean cycle {:.0}us",
        started.elapsed().as_secs_f32(),
        report.final_snapshot.reps.rep_count,
        report.metrics.cycles,
        report.metrics.read_failures,
        report.metrics.mean_cycle_us(),
    );
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!(
            "last {} filtered angles: {first:.1} .. {last:.1} deg",
            series.len()
        );
    }
    Ok(())
}
