use chrono::{DateTime, Utc};
use clap::Parser;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use floodgate::config::{BlockingMode, DemoConfig, FloodgateConfig, LoggingConfig, StrategyKind};
use floodgate::ratelimit::{Admission, CounterMetrics, Limiter, SystemClock};

/// Drive a limiter with synthetic client traffic.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Admission strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Tokens or queue slots per client
    #[arg(long)]
    capacity: Option<u32>,

    /// Tokens refilled or requests drained per tick
    #[arg(long)]
    rate: Option<u32>,

    /// Maintenance tick period in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Wait for queue space instead of rejecting (leaky bucket only)
    #[arg(long)]
    wait: bool,

    /// Number of distinct clients
    #[arg(long)]
    keys: Option<u32>,

    /// Stop after this many requests
    #[arg(long)]
    requests: Option<u64>,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,
}

/// A synthetic unit of work submitted by a client.
#[derive(Debug, Clone)]
struct DemoRequest {
    id: Uuid,
    data: String,
    created_at: DateTime<Utc>,
}

impl DemoRequest {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            data: "payload".to_string(),
            created_at: Utc::now(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_tracing(&config.logging);

    info!("Starting Floodgate demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        strategy = %config.limiter.strategy,
        capacity = config.limiter.capacity,
        rate = config.limiter.rate,
        interval_ms = config.limiter.interval_ms,
        "Configuration loaded"
    );

    let metrics = Arc::new(CounterMetrics::new());
    let limiter = Arc::new(Limiter::<u32, DemoRequest>::with_collaborators(
        config.limiter.clone(),
        Arc::new(SystemClock),
        metrics.clone(),
    )?);
    limiter.start()?;

    tokio::select! {
        _ = drive(limiter.as_ref(), &config.demo, cli.json) => {
            info!("Demo traffic finished");
        }
        _ = shutdown_signal() => {}
    }

    let report = limiter.shutdown().await?;
    info!(flushed = report.flushed, "Limiter flushed");

    let summary = metrics.snapshot();
    if cli.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        info!(
            admitted = summary.admitted,
            throttled = summary.throttled,
            drained = summary.drained,
            evicted = summary.evicted,
            tick_errors = summary.tick_errors,
            "Floodgate demo stopped"
        );
    }
    Ok(())
}

/// Layer the config file, `FLOODGATE__*` environment variables and CLI flags.
fn load_config(cli: &Cli) -> anyhow::Result<FloodgateConfig> {
    let mut config = FloodgateConfig::load(cli.config.as_deref())?;

    if let Some(strategy) = cli.strategy {
        config.limiter.strategy = strategy;
    }
    if let Some(capacity) = cli.capacity {
        config.limiter.capacity = capacity;
    }
    if let Some(rate) = cli.rate {
        config.limiter.rate = rate;
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.limiter.interval_ms = interval_ms;
    }
    if cli.wait {
        config.limiter.blocking = BlockingMode::Wait;
    }
    if let Some(keys) = cli.keys {
        config.demo.keys = keys;
    }
    if cli.requests.is_some() {
        config.demo.requests = cli.requests;
    }

    config.limiter.validate()?;
    if config.demo.keys == 0 {
        anyhow::bail!("demo.keys must be greater than 0");
    }
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Submit one request from a random client per pacing period.
async fn drive(admission: &dyn Admission<u32, DemoRequest>, demo: &DemoConfig, json: bool) {
    let pace = Duration::from_millis(demo.pace_ms);
    let mut sent: u64 = 0;

    while demo.requests.map_or(true, |limit| sent < limit) {
        let client = rand::thread_rng().gen_range(1..=demo.keys);
        let request = DemoRequest::new();
        let (request_id, created_at) = (request.id, request.created_at);

        let decision = admission.admit(client, request).await;
        sent += 1;

        if json {
            let line = serde_json::json!({
                "client": decision.key,
                "request_id": request_id,
                "admitted": decision.is_admitted(),
                "reason": decision.reason(),
            });
            println!("{}", line);
        } else if let Some(returned) = decision.request.as_ref().filter(|_| decision.is_admitted()) {
            println!(
                "{} -> {} [{}] ({})",
                decision.key,
                returned.data,
                returned.id,
                decision.reason()
            );
        } else {
            println!("{}-{} -> {}", decision.key, created_at, decision.reason());
        }

        tokio::time::sleep(pace).await;
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
