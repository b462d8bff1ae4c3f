use anyhow::{Context, Result};
use cem_control::{ControlLoop, ControllerChain, JsonLinesSink, LogSink, TelemetrySink};
use cem_devices::RuntimeContext;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod fleet;

use config::CemSettings;

#[derive(Parser)]
#[command(name = "cem-daemon")]
#[command(about = "Energy management daemon: runs the control loop over the device fleet")]
struct Args {
    /// Settings file (YAML). Defaults apply when it does not exist.
    #[arg(long, default_value = "cem.yaml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Stop after this many seconds; 0 runs until ctrl-c
    #[arg(long)]
    duration: Option<u64>,

    /// Simulation speed-up factor
    #[arg(long)]
    speed: Option<f64>,

    /// Print the loop metrics on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = CemSettings::load(&args.config)?;
    settings.apply_env(|name| std::env::var(name).ok())?;
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }
    if let Some(d) = args.duration {
        settings.duration_s = d;
    }
    if let Some(speed) = args.speed {
        settings.simulation_speed_up = speed;
    }
    settings.validate()?;
    setup_tracing(&settings.log_level);

    info!(config = %args.config.display(), loop_time_s = settings.loop_time_s,
        speed_up = settings.simulation_speed_up, "cem-daemon starting");

    let ctx = RuntimeContext::new(settings.simulation_speed_up)
        .with_io_timeout(settings.io_timeout())
        .with_seed(settings.seed);

    let (devices, controllers) = if settings.devices.is_empty() {
        info!("no devices configured, using the demo fleet");
        (fleet::demo_devices(), fleet::demo_controllers())
    } else {
        (settings.devices.clone(), settings.controllers.clone())
    };
    let fleet = fleet::build_fleet(&devices, &ctx).context("loading devices")?;
    let chain = ControllerChain::from_configs(&controllers, &fleet).context("loading controllers")?;
    if chain.is_empty() {
        warn!("no controllers configured; devices are only monitored");
    }

    let sink: Arc<dyn TelemetrySink> = match &settings.telemetry_file {
        Some(path) => {
            let sink = JsonLinesSink::open(path)
                .await
                .with_context(|| format!("opening telemetry file {}", path.display()))?;
            info!(path = %path.display(), "writing telemetry as JSON lines");
            Arc::new(sink)
        }
        None => Arc::new(LogSink),
    };

    let mut cem = ControlLoop::new(fleet, chain, sink, ctx, settings.loop_config())?;
    cem.start()?;

    if settings.duration_s > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(settings.duration_s)) => {
                info!(duration_s = settings.duration_s, "run duration elapsed");
            }
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for ctrl-c")?;
                info!("ctrl-c received");
            }
        }
    } else {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        info!("ctrl-c received");
    }

    let stopped = cem.shutdown().await;
    info!(run_id = %cem.run_id(), state = ?cem.state(), "cem-daemon stopped");
    if args.metrics {
        print!("{}", cem.metrics().encode_text());
    }
    stopped.context("stopping the control loop")
}

fn setup_tracing(level: &str) {
    // RUST_LOG wins over the configured level; ignore a second init
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
