use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use convoy_sync::log_format::TargetFirstFormat;
use convoy_sync::{
    ConnectionStatus, Entity, HttpRemoteApi, KinematicSimulator, Supervisor, SupervisorCommand,
    SupervisorHandle, SyncConfig, WebSocketConnector,
};

#[derive(Parser, Debug)]
#[command(
    name = "convoy-sync",
    version,
    about = "Track a convoy from a live feed, falling back to simulation when the feed is down"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the synchronization engine and read operator commands from stdin
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base URL of the convoy API server
    #[arg(long = "api-url")]
    api_url: Option<String>,
    /// WebSocket URL of the live feed
    #[arg(long = "stream-url")]
    stream_url: Option<String>,
    /// Start in simulation without probing the live backend
    #[arg(long, default_value_t = false)]
    simulated: bool,
    /// Seconds between fleet reports in the log (0 disables them)
    #[arg(long = "report-interval", default_value_t = 10)]
    report_interval: u64,
    /// Serve Prometheus metrics on this port
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq)]
enum OperatorInput {
    Command(SupervisorCommand),
    Status,
    Quit,
}

fn parse_operator_input(line: &str) -> Result<Option<OperatorInput>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let input = match word.to_ascii_lowercase().as_str() {
        "live" => OperatorInput::Command(SupervisorCommand::SwitchToLive),
        "sim" | "simulate" => OperatorInput::Command(SupervisorCommand::SwitchToSimulated),
        "reset" => OperatorInput::Command(SupervisorCommand::ResetMission),
        "speed" => {
            let raw = words.next().ok_or("usage: speed <multiplier>")?;
            let multiplier: f64 = raw
                .parse()
                .map_err(|_| format!("invalid speed multiplier: {}", raw))?;
            OperatorInput::Command(SupervisorCommand::SetSpeedMultiplier(multiplier))
        }
        "status" => OperatorInput::Status,
        "quit" | "exit" => OperatorInput::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(input))
}

fn build_config(args: &RunArgs) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    config.apply_env();
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(url) = &args.stream_url {
        config.stream_url = url.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn render_fleet(status: &ConnectionStatus, fleet: &[Entity]) -> String {
    let mut out = format!(
        "mode={} entities={} reconnect_attempt={}",
        status.mode,
        fleet.len(),
        status.reconnect_attempt
    );
    if let Some(error) = &status.last_error {
        out.push_str(&format!(" last_error=\"{}\"", error));
    }
    out.push('\n');
    out.push_str(&format!(
        "{:<12} {:<12} {:<8} {:>4} {:>6} {:>7} {:>6} {:>6} {:>10} {:>10}\n",
        "ID", "CALLSIGN", "STATUS", "WP", "PROG%", "BATT%", "FUEL%", "HLTH", "LAT", "LON"
    ));
    for entity in fleet {
        out.push_str(&format!(
            "{:<12} {:<12} {:<8} {:>4} {:>6.1} {:>7.1} {:>6.1} {:>6.1} {:>10.4} {:>10.4}\n",
            entity.id,
            entity.callsign,
            entity.status,
            entity.route_index,
            entity.route_progress * 100.0,
            entity.telemetry.battery_percent,
            entity.telemetry.fuel_percent,
            entity.telemetry.system_health,
            entity.position.latitude,
            entity.position.longitude,
        ));
    }
    out
}

/// Read operator commands until `quit`. Returns only on `quit` or a read error.
async fn read_operator_commands(handle: &SupervisorHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_operator_input(&line) {
            Ok(None) => {}
            Ok(Some(OperatorInput::Quit)) => return Ok(()),
            Ok(Some(OperatorInput::Status)) => {
                let status = handle.status().borrow().clone();
                let fleet = handle.fleet().borrow().clone();
                println!("{}", render_fleet(&status, &fleet));
            }
            Ok(Some(OperatorInput::Command(command))) => handle.send(command)?,
            Err(message) => warn!("{}", message),
        }
    }
    debug!("stdin closed, operator commands disabled");
    std::future::pending::<()>().await;
    Ok(())
}

async fn report_fleet(handle: SupervisorHandle, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let status = handle.status().borrow().clone();
        let fleet = handle.fleet().borrow().clone();
        let low = fleet.iter().filter(|e| e.is_low_on_resources()).count();
        info!(
            mode = %status.mode,
            entities = fleet.len(),
            low_on_resources = low,
            "Fleet report"
        );
        debug!("\n{}", render_fleet(&status, &fleet));
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;

    if let Some(port) = args.metrics_port {
        convoy_sync::metrics::start_metrics_exporter(port)?;
    }

    let route = config.route();
    info!(
        api = %config.api_base_url,
        stream = %config.stream_url,
        waypoints = route.len(),
        "Starting convoy-sync"
    );

    let client = reqwest::Client::builder()
        .user_agent(concat!("convoy-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let api = Arc::new(HttpRemoteApi::new(
        client,
        config.api_base_url.clone(),
        config.probe_timeout(),
    ));
    let connector = Arc::new(WebSocketConnector::new(
        config.stream_url.clone(),
        route.clone(),
    ));
    let simulator = KinematicSimulator::new(route, config.simulator.clone());

    let (supervisor, handle) =
        Supervisor::new(config.supervisor_settings(), api, connector, simulator);
    let supervisor_task = tokio::spawn(supervisor.with_simulated_start(args.simulated).run());

    let report_task = (args.report_interval > 0).then(|| {
        tokio::spawn(report_fleet(
            handle.clone(),
            Duration::from_secs(args.report_interval),
        ))
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!("Interrupt received, shutting down");
        }
        result = read_operator_commands(&handle) => {
            result?;
            info!("Quit requested, shutting down");
        }
    }

    if let Some(task) = report_task {
        task.abort();
    }
    // The supervisor may already be gone; shutdown is idempotent
    let _ = handle.send(SupervisorCommand::Shutdown);
    supervisor_task.await.context("Supervisor task failed")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,convoy_sync=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(TargetFirstFormat::new(std::io::stderr().is_terminal()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}
