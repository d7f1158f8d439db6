//! CLI entry point for benchlog.
//!
//! ```bash
//! # Acquire from the configured devices, recording to CSV
//! benchlog run --config config/benchlog.toml --output data/run.csv --start
//!
//! # No devices attached
//! benchlog run --simulate --json
//!
//! # One meter read
//! benchlog probe-meter
//! ```
//!
//! While `run` is active, operator commands are read from stdin, one per
//! line: `start`, `stop`, `reset`, `interval N`, `channels a,b,..`,
//! `status`, `quit`.

use anyhow::{anyhow, Context, Result};
use benchlog::aggregator::{Aggregator, TickOutcome, STATUS_METER_UNAVAILABLE};
use benchlog::clock::ClockEngine;
use benchlog::config::{BenchConfig, HardwareDriver, DEFAULT_CONFIG_PATH};
use benchlog::control::OperatorCommand;
use benchlog::data::{CsvSink, ThreadedSink};
use benchlog::hardware::{ChassisBackend, HardwareAdapter, MockChassis, NoChassis};
use benchlog::logging;
use benchlog::meter::{
    MeterClient, MeterError, MeterTransport, MockMeterTransport, SerialMeterTransport,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Longest wait for both pollers to publish before `--start` begins the test.
const FIRST_READING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "benchlog", version)]
#[command(about = "Bench instrumentation acquisition and logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition pipeline
    Run(RunArgs),

    /// Read the power meter once and print the decoded values
    ProbeMeter {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated chassis and meter
    #[arg(long)]
    simulate: bool,

    /// CSV file for recorded rows (overrides storage.output)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Reporting interval in seconds: 1, 5, 30 or 60
    #[arg(long)]
    interval: Option<u32>,

    /// Start recording immediately
    #[arg(long)]
    start: bool,

    /// Print due records to stdout as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::ProbeMeter { config } => probe_meter(&config).await,
    }
}

fn load_config(path: &Path, overrides: impl FnOnce(&mut BenchConfig)) -> Result<BenchConfig> {
    let mut config = BenchConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    Ok(config)
}

fn build_hardware(config: &BenchConfig) -> HardwareAdapter {
    let backend: Box<dyn ChassisBackend> = match config.hardware.driver {
        HardwareDriver::Simulated => Box::new(match config.hardware.inventory() {
            Some(inventory) => MockChassis::simulated_with(inventory),
            None => MockChassis::simulated(),
        }),
        HardwareDriver::None => {
            warn!("No chassis driver configured");
            Box::new(NoChassis)
        }
    };
    HardwareAdapter::new(backend).with_settle_delay(config.hardware.settle_delay())
}

/// Meter transport per configuration, opened eagerly so a missing port is
/// reported at startup.
fn build_meter_transport(config: &BenchConfig) -> (Box<dyn MeterTransport>, Option<MeterError>) {
    if config.meter.simulate {
        return (Box::new(MockMeterTransport::simulated()), None);
    }
    let mut serial = SerialMeterTransport::new(config.meter.serial_settings());
    let failure = serial.open().err();
    (Box::new(serial), failure)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.config, |config| {
        if args.simulate {
            config.hardware.driver = HardwareDriver::Simulated;
            config.meter.simulate = true;
        }
        if let Some(seconds) = args.interval {
            config.pipeline.reporting_interval_secs = seconds;
        }
        if let Some(output) = args.output.clone() {
            config.storage.output = Some(output);
        }
    })?;
    info!(name = %config.application.name, "Starting");

    let interval = config.pipeline.reporting_interval()?;
    let hardware = build_hardware(&config);
    let (transport, meter_failure) = build_meter_transport(&config);
    let meter = MeterClient::new(transport)
        .with_poll_pause(config.meter.poll_pause())
        .with_fault_backoff(config.meter.fault_backoff());

    let mut aggregator = Aggregator::new(ClockEngine::new(interval), hardware, meter)
        .with_log_capacity(config.pipeline.log_capacity)
        .with_conversion(config.conversion.clone())
        .with_energy_reset(config.meter.reset_energy_on_start);

    if let Some(err) = meter_failure {
        error!(port = %config.meter.port, error = %err, "Meter unavailable; polling will keep retrying");
        aggregator.push_status(STATUS_METER_UNAVAILABLE);
    }

    if let Some(path) = &config.storage.output {
        let csv = CsvSink::create(path, &config.conversion.names())
            .with_context(|| format!("Failed to open {}", path.display()))?;
        aggregator.add_sink(Box::new(ThreadedSink::spawn(Box::new(csv))?));
    }

    aggregator.start_acquisition()?;
    if args.start {
        if !aggregator
            .wait_for_first_readings(FIRST_READING_TIMEOUT)
            .await
        {
            warn!(
                timeout_secs = FIRST_READING_TIMEOUT.as_secs(),
                "Starting test without a complete first reading"
            );
        }
        aggregator.start_test();
    }

    let mut ticker = tokio::time::interval(config.pipeline.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = aggregator.tick();
                report(&outcome, args.json)?;
            }
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if !handle_command(&mut aggregator, &line, config.pipeline.chart_tail) {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Control input closed; running until interrupted");
                    stdin_open = false;
                }
                Err(err) => {
                    warn!(error = %err, "Reading control input failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    tokio::task::block_in_place(|| aggregator.shutdown());
    Ok(())
}

/// Returns `false` when the operator asked to quit.
fn handle_command(aggregator: &mut Aggregator, line: &str, chart_tail: usize) -> bool {
    let command = match line.parse::<OperatorCommand>() {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "Ignoring command");
            return true;
        }
    };

    if command == OperatorCommand::Status {
        let clock = aggregator.clock();
        let chart = aggregator.chart_series(chart_tail);
        info!(
            test_active = aggregator.is_test_active(),
            elapsed_secs = clock.elapsed_secs,
            test_minutes = clock.test_minutes,
            records = aggregator.log().len(),
            meter_connected = aggregator.meter().latest_snapshot().connected,
            status = aggregator.latest_status().map(|s| s.text.as_str()).unwrap_or(""),
            channels = ?aggregator.selected_channels(),
            chart_points = chart.len(),
            latest = ?chart.last().map(|p| &p.values),
            "Status"
        );
    }

    match command.apply(aggregator) {
        Ok(keep_running) => keep_running,
        Err(err) => {
            warn!(error = %err, "Command failed");
            true
        }
    }
}

fn report(outcome: &TickOutcome, json: bool) -> Result<()> {
    if !outcome.should_write {
        return Ok(());
    }
    let record = &outcome.output;
    if json {
        println!("{}", serde_json::to_string(record)?);
    } else {
        println!(
            "{} {:>8.2} min  {:>7.1} V  {:>8.1} W  {:>9.1} Wh  T1 {}{}",
            record.time_of_day.format("%H:%M:%S"),
            record.test_minutes,
            record.meter.avg_voltage,
            record.meter.watts,
            record.meter.energy_wh,
            record
                .ambient()
                .map(|t| format!("{:.1} °F", t))
                .unwrap_or_else(|| "--".to_string()),
            if outcome.test_active { "  [REC]" } else { "" },
        );
    }
    Ok(())
}

async fn probe_meter(config_path: &Path) -> Result<()> {
    let config = load_config(config_path, |_| {})?;
    let (transport, failure) = build_meter_transport(&config);
    if let Some(err) = failure {
        return Err(anyhow!(err)).context(STATUS_METER_UNAVAILABLE);
    }

    let reading = tokio::task::spawn_blocking(move || {
        let client = MeterClient::new(transport);
        client.poll_once()
    })
    .await
    .context("Meter probe task failed")??;

    println!("{}", serde_json::to_string_pretty(&reading)?);
    Ok(())
}
