//! CLI entry point for the lanbeat-discover scanner.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use lanbeat_core::types::{ScanOptions, ScanProfile, ScanScope};

use lanbeat_discover::config;
use lanbeat_discover::eventlog::{EventStream, StreamItem};
use lanbeat_discover::executor::HostDiscovery;
use lanbeat_discover::inventory::{FileInventory, InventorySource, NullInventory};
use lanbeat_discover::job::Orchestrator;

#[derive(Parser)]
#[command(name = "lanbeat-discover")]
#[command(about = "LAN device discovery for the lanbeat monitor")]
struct Cli {
    /// Config file prefix (default: lanbeat).
    #[arg(short, long, default_value = "lanbeat")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a discovery job and run it to completion.
    Start {
        /// Scan scope: auto, custom, or a series (10, 172, 192, all).
        #[arg(short, long, default_value = "auto")]
        scope: String,

        /// CIDR to scan; repeatable. Implies --scope custom.
        #[arg(short, long)]
        range: Vec<String>,

        /// Restrict auto planning to one local interface.
        #[arg(short, long)]
        interface: Option<String>,

        /// Scan profile: safe, normal, fast.
        #[arg(short, long, default_value = "normal")]
        profile: String,

        /// Cancel any active job and start anyway.
        #[arg(long)]
        force: bool,
    },

    /// Show the current job's status.
    Status,

    /// Request cancellation of the active job.
    Cancel,

    /// Follow the event log as JSON lines.
    Stream {
        /// Resume after this sequence id (0 replays everything).
        #[arg(long, default_value_t = 0)]
        from_seq: u64,
    },

    /// Show the current job's device results.
    Result,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    let inventory: Arc<dyn InventorySource> = match &cfg.inventory_path {
        Some(path) => Arc::new(FileInventory::new(path.clone())),
        None => Arc::new(NullInventory),
    };
    let backend = HostDiscovery::new(&cfg);
    let orch = Orchestrator::new(cfg.clone(), backend, inventory);

    match cli.command {
        Command::Start {
            scope,
            range,
            interface,
            profile,
            force,
        } => {
            let options = build_options(&scope, range, interface, &profile, cfg.subnet_cap)?;
            let outcome = orch.start(options, force).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.accepted {
                anyhow::bail!("a discovery job is already running (use --force to replace it)");
            }
            orch.wait().await;
            if let Some(result) = orch.result()? {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }

        Command::Status => match orch.status()? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("{{}}"),
        },

        Command::Cancel => {
            if orch.cancel().await? {
                tracing::info!("Cancellation requested");
            } else {
                tracing::info!("No active job to cancel");
            }
        }

        Command::Stream { from_seq } => {
            let mut stream = EventStream::subscribe(
                &orch.store().log_path(),
                from_seq,
                cfg.stream_poll(),
                cfg.stream_ping(),
            );
            while let Some(item) = stream.next().await? {
                match item {
                    StreamItem::Event(event) => println!("{}", serde_json::to_string(&event)?),
                    StreamItem::Ping => println!(":"),
                }
            }
        }

        Command::Result => match orch.result()? {
            Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            None => println!("{{}}"),
        },
    }

    Ok(())
}

fn build_options(
    scope: &str,
    ranges: Vec<String>,
    interface: Option<String>,
    profile: &str,
    default_cap: usize,
) -> anyhow::Result<ScanOptions> {
    let scope = if !ranges.is_empty() {
        ScanScope::Custom
    } else {
        scope.parse::<ScanScope>()?
    };
    if scope == ScanScope::Custom && ranges.is_empty() {
        anyhow::bail!("--scope custom requires at least one --range");
    }
    Ok(ScanOptions {
        scope,
        custom_ranges: ranges,
        interface_hint: interface,
        profile: profile.parse::<ScanProfile>()?,
        subnet_cap: default_cap,
    })
}
