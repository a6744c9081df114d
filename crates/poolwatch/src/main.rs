use clap::{Args, Parser, Subcommand, ValueEnum};
use poolwatch_core::types::{CONNECT_TIMEOUT_MS, VALIDATION_QUERY};
use poolwatch_core::{EndpointRegistry, EndpointSpec, RandomSelector};
use poolwatch_health::{BlacklistMonitor, MonitorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "poolwatch", about = "Health monitor for a pool of data-source endpoints")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the pool continuously and maintain the blacklist
    Run {
        #[command(flatten)]
        pool: PoolArgs,
        /// Seconds to sleep between rounds
        #[arg(long, env = "POOLWATCH_SLEEP_SECONDS", default_value_t = 30)]
        sleep_seconds: u64,
    },
    /// Probe every endpoint once and print the result
    Check {
        #[command(flatten)]
        pool: PoolArgs,
    },
}

#[derive(Args)]
struct PoolArgs {
    /// Endpoint to monitor, as name=host:port (repeatable)
    #[arg(long = "endpoint", value_name = "NAME=HOST:PORT")]
    endpoints: Vec<String>,
    /// YAML file listing endpoints
    #[arg(long, env = "POOLWATCH_ENDPOINTS_FILE")]
    endpoints_file: Option<PathBuf>,
    /// Connect timeout for endpoints that do not set their own
    #[arg(long, env = "POOLWATCH_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,
    /// Validation query for endpoints that do not set their own
    #[arg(long, env = "POOLWATCH_VALIDATION_QUERY")]
    validation_query: Option<String>,
    /// Consecutive failures before an endpoint is blacklisted
    #[arg(long, env = "POOLWATCH_BLACKLIST_THRESHOLD", default_value_t = 3)]
    blacklist_threshold: u32,
    /// Probes allowed in flight at once within a round
    #[arg(long, env = "POOLWATCH_MAX_CONCURRENT_PROBES", default_value_t = 1)]
    max_concurrent_probes: usize,
    /// Timeout in seconds for each step of a probe
    #[arg(long, env = "POOLWATCH_PROBE_TIMEOUT_SECS", default_value_t = 10)]
    probe_timeout_secs: u64,
}

impl PoolArgs {
    fn monitor_config(&self, sleep_seconds: u64) -> MonitorConfig {
        MonitorConfig {
            sleep_seconds,
            blacklist_threshold: self.blacklist_threshold,
            max_concurrent_probes: self.max_concurrent_probes,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            pool,
            sleep_seconds,
        } => run_monitor(&pool, sleep_seconds).await,
        Commands::Check { pool } => run_check(&pool).await,
    }
}

/// Run the monitor until ctrl-c
async fn run_monitor(pool: &PoolArgs, sleep_seconds: u64) -> miette::Result<()> {
    let registry = build_registry(pool).await?;
    let mut monitor = BlacklistMonitor::new(registry.clone(), pool.monitor_config(sleep_seconds))?;
    let wake = monitor.wake_handle();

    let token = CancellationToken::new();

    let monitor_token = token.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_token).await;
    });

    // SIGHUP triggers an immediate round
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())
            .map_err(|e| miette::miette!("Failed to listen for SIGHUP: {}", e))?;
        let hangup_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = hangup_token.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("SIGHUP received, probing now");
                        wake.wake();
                    }
                }
            }
        });
    }
    #[cfg(not(unix))]
    let _ = wake;

    info!("Monitoring {} endpoint(s)", registry.len().await);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    if tokio::time::timeout(shutdown_timeout, monitor_handle)
        .await
        .is_err()
    {
        warn!(
            "Monitor did not stop within {}s, exiting anyway",
            shutdown_timeout.as_secs()
        );
    }

    let blacklist = registry.blacklist().await;
    if !blacklist.is_empty() {
        info!("Blacklisted at shutdown: {}", blacklist.join(", "));
    }
    info!("Shutdown complete");

    Ok(())
}

/// Run one round and print per-endpoint status
async fn run_check(pool: &PoolArgs) -> miette::Result<()> {
    let registry = build_registry(pool).await?;
    let mut monitor = BlacklistMonitor::new(registry.clone(), pool.monitor_config(1))?;

    let report = monitor.run_round().await;

    let endpoints = registry.endpoint_map().await;
    let mut names: Vec<&String> = endpoints.keys().collect();
    names.sort();

    for name in names {
        let endpoint = &endpoints[name];
        let status = if endpoint.probe_target().is_none() {
            "unmanaged"
        } else if monitor.tracker().count(name) == 0 {
            "ok"
        } else {
            "failed"
        };
        let marker = if registry.is_blacklisted(name).await {
            " (blacklisted)"
        } else {
            ""
        };
        println!("{:<20} {:<30} {}{}", name, endpoint.address(), status, marker);
    }

    println!(
        "{} probed, {} healthy, {} failed, {} skipped",
        report.probed, report.healthy, report.failed, report.skipped
    );

    if report.probed > 0 && report.healthy == 0 {
        return Err(miette::miette!("No endpoint passed validation"));
    }
    Ok(())
}

/// Build the registry from the endpoints file and `--endpoint` flags
async fn build_registry(pool: &PoolArgs) -> miette::Result<Arc<RandomSelector>> {
    let mut specs = match &pool.endpoints_file {
        Some(path) => poolwatch_core::load_endpoints_file(path)?,
        None => Vec::new(),
    };
    for raw in &pool.endpoints {
        specs.push(EndpointSpec::parse(raw)?);
    }

    for spec in &mut specs {
        if let Some(ms) = pool.connect_timeout_ms {
            if spec.properties.get(CONNECT_TIMEOUT_MS).is_none() {
                spec.properties.insert(CONNECT_TIMEOUT_MS, ms.to_string());
            }
        }
        if let Some(query) = &pool.validation_query {
            if spec.properties.get(VALIDATION_QUERY).is_none() {
                spec.properties.insert(VALIDATION_QUERY, query.clone());
            }
        }
    }

    poolwatch_core::check_unique(&specs)?;
    if specs.is_empty() {
        return Err(miette::miette!(
            help = "Pass --endpoint name=host:port or --endpoints-file <path>",
            "No endpoints configured"
        ));
    }

    let registry = Arc::new(RandomSelector::new());
    for spec in &specs {
        registry.register(spec.name.clone(), spec.build()).await?;
    }
    Ok(registry)
}
