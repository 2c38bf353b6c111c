//! OnionLens CLI
//!
//! Inspect the active Tor circuit, watch connection status and preview how
//! requests would be routed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use onionlens_core::{
    classify, should_isolate_circuit, system_clock, CircuitDetails, ConnectionStatus, PrivacyMode,
    RequestOrigin, RequestRouter,
};
use onionlens_runtime::{AppConfig, ConnectionMonitor, MemoryStatusStore};
use onionlens_tor::TorControlClient;

#[derive(Parser)]
#[command(name = "onionlens")]
#[command(author, version, about = "OnionLens: Tor circuit inspection and privacy routing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tor control port address
    #[arg(long, env = "ONIONLENS_CONTROL_ADDR")]
    control_addr: Option<String>,

    /// Tor control port password
    #[arg(long, env = "ONIONLENS_CONTROL_PASSWORD", hide_env_values = true)]
    control_password: Option<String>,

    /// Tor SOCKS proxy (e.g. socks5h://127.0.0.1:9050)
    #[arg(long)]
    socks_addr: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one connection check and print the snapshot
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the circuit currently carrying traffic
    Circuit,

    /// Ask Tor for fresh circuits (SIGNAL NEWNYM)
    NewCircuit,

    /// Poll the connection and print every snapshot
    Monitor {
        /// Seconds between checks (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Classify a request URL by sensitivity
    Classify {
        url: String,
    },

    /// Show which transport a request would take
    Route {
        url: String,

        /// URL of the context issuing the request
        #[arg(long)]
        origin: Option<String>,

        /// Browser tab id (-1 for background requests)
        #[arg(long, allow_hyphen_values = true)]
        tab_id: Option<i64>,

        /// Privacy mode (direct, tor, nym); defaults to the configured mode
        #[arg(short, long)]
        mode: Option<PrivacyMode>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Status { json } => check_status(&config, json).await?,
        Commands::Circuit => show_circuit(&config).await?,
        Commands::NewCircuit => new_circuit(&config).await?,
        Commands::Monitor { interval, duration } => {
            let interval = interval.map(Duration::from_secs).unwrap_or(config.monitor.interval());
            run_monitor(&config, interval, duration.map(Duration::from_secs)).await?;
        }
        Commands::Classify { url } => {
            let sensitivity = classify(&url);
            println!("🔍 {}", url);
            println!("   Sensitivity: {}", sensitivity);
            println!(
                "   Isolate circuit: {}",
                if should_isolate_circuit(sensitivity) { "yes" } else { "no" }
            );
        }
        Commands::Route { url, origin, tab_id, mode } => {
            let mode = mode.unwrap_or(config.privacy.mode);
            let router = RequestRouter::new(config.app_base_url.clone(), config.privacy.clone());
            let request = RequestOrigin {
                url,
                origin_url: origin,
                tab_id,
            };
            println!("🔀 {} ({} mode)", request.url, mode);
            println!(
                "   First-party: {}",
                if router.is_first_party(&request) { "yes" } else { "no" }
            );
            println!("   Transport: {}", router.route(&request, mode));
        }
    }

    Ok(())
}

/// File config, then CLI/env overrides
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };

    if let Some(addr) = &cli.control_addr {
        config.tor.control_addr = addr.clone();
    }
    if let Some(password) = &cli.control_password {
        config.control.password = Some(password.clone());
    }
    if let Some(socks) = &cli.socks_addr {
        config.tor.socks_addr = socks.clone();
    }

    Ok(config)
}

fn build_monitor(config: &AppConfig) -> Result<(Arc<TorControlClient>, ConnectionMonitor)> {
    let clock = system_clock();
    let client = Arc::new(config.control_client(clock.clone()));
    let probe = config.probe().context("Building egress probe")?;

    let monitor = ConnectionMonitor::new(
        Some(client.clone()),
        Arc::new(probe),
        MemoryStatusStore::shared(),
        clock,
        &config.monitor,
    );
    Ok((client, monitor))
}

async fn check_status(config: &AppConfig, json: bool) -> Result<()> {
    let (client, monitor) = build_monitor(config)?;

    if !json {
        println!("🔌 Checking Tor connection...\n");
    }

    let status = monitor.check_connection().await;
    close_session(&client).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
        if !status.connected {
            println!("\n   Expected proxy at: {}", config.tor.socks_addr);
            println!("   Expected control port at: {}", config.tor.control_addr);
        }
    }

    Ok(())
}

async fn show_circuit(config: &AppConfig) -> Result<()> {
    let client = config.control_client(system_clock());

    let details = client
        .circuit_details()
        .await
        .context("Querying circuit status")?;
    close_session(&client).await;

    match details {
        Some(details) => print_circuit(&details),
        None => {
            println!("⚠️  No active circuit");
            println!("   Tor has no succeeded stream on a built 3-hop circuit yet.");
        }
    }

    Ok(())
}

async fn new_circuit(config: &AppConfig) -> Result<()> {
    let client = config.control_client(system_clock());

    client
        .request_new_circuit()
        .await
        .context("Requesting new circuit")?;
    close_session(&client).await;

    println!("✅ New circuit requested");
    println!("   New streams will use fresh circuits.");
    Ok(())
}

async fn run_monitor(config: &AppConfig, interval: Duration, duration: Option<Duration>) -> Result<()> {
    let (client, monitor) = build_monitor(config)?;
    let mut updates = monitor.subscribe();

    println!("👁️  Monitoring Tor connection every {}s\n", interval.as_secs().max(1));
    monitor.start_monitoring(interval);

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                println!("[{}]", status.last_checked.format("%H:%M:%S"));
                print_status(&status);
                println!();
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.stop_monitoring();
    close_session(&client).await;
    println!("Monitoring stopped.");
    Ok(())
}

/// Send QUIT, logging rather than failing the command if it doesn't go through
async fn close_session(client: &TorControlClient) {
    if let Err(e) = client.disconnect().await {
        warn!("Failed to close control session: {}", e);
    }
}

fn print_status(status: &ConnectionStatus) {
    let icon = match (status.connected, status.circuit_established) {
        (true, true) => "✅",
        (true, false) => "⚠️ ",
        _ => "❌",
    };
    println!("{} {}", icon, status.label());

    if status.connected && !status.circuit_established {
        println!("   Egress is reachable but not through Tor");
    }
    if let Some(entry) = &status.entry_node {
        println!("   Entry:  {}", entry);
    }
    if let Some(middle) = &status.middle_node {
        println!("   Middle: {}", middle);
    }
    if let Some(exit) = &status.exit_node {
        println!("   Exit:   {}", exit);
    }
    if let Some(country) = &status.country {
        println!("   Exit country: {}", country);
    }
    if let Some(error) = &status.error {
        println!("   Error: {}", error);
    }
}

fn print_circuit(details: &CircuitDetails) {
    println!("🧅 Circuit {} (age {}s)", details.circuit_id, details.build_time.as_secs());

    let hops = [
        ("Entry", &details.entry_node),
        ("Middle", &details.middle_node),
        ("Exit", &details.exit_node),
    ];
    for (role, node) in hops {
        if let Some(node) = node {
            println!("   {:<7} {}", format!("{}:", role), node.summary());
        }
    }
}
