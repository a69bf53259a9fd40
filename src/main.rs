use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use geoetl_relay::config::{ExecutorConfig, NodeConfig, SchedulerConfig};
use geoetl_relay::node::Node;
use geoetl_relay::scheduler::{calc_packets, create_packets, ClusterJob, JobPacket};
use geoetl_relay::shutdown::install_shutdown_handler;
use geoetl_relay::worker::JsonJobIntrospector;

#[derive(Parser, Debug)]
#[command(name = "geoetl-relay")]
#[command(version)]
#[command(about = "Deadline-aware job-packet scheduler for chained ETL stages")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a packet to completion on a local node
    Run(RunArgs),

    /// Show how a packet would be split into partitions
    Split(SplitArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Packet document (JSON) to run
    #[arg(long)]
    packet: PathBuf,

    /// Target that continues the packet (defaults to the packet's `next`)
    #[arg(long)]
    target: Option<String>,

    /// Wall-clock budget of each invocation, in seconds
    #[arg(long, env = "RELAY_BUDGET_SECS", default_value = "900")]
    budget_secs: u64,

    /// Headroom kept before the end of each invocation, in seconds
    #[arg(long, env = "RELAY_SAFETY_MARGIN_SECS", default_value = "10")]
    safety_margin_secs: u64,

    /// Timeout for jobs that do not declare `timeout_secs`
    #[arg(long, env = "RELAY_DEFAULT_TIMEOUT_SECS", default_value = "60")]
    default_timeout_secs: u64,

    /// Shell used to run job commands
    #[arg(long, env = "RELAY_SHELL", default_value = "sh")]
    shell: String,

    /// Port for the status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Stop once nothing is queued or running
    #[arg(long)]
    exit_when_idle: bool,
}

#[derive(Parser, Debug)]
struct SplitArgs {
    /// Packet document (JSON) to inspect
    #[arg(long)]
    packet: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct PartitionOutput {
    job: ClusterJob,
    jobs: usize,
}

#[derive(Serialize)]
struct SplitOutput {
    total_jobs: usize,
    max_batch: usize,
    partitions: Vec<PartitionOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn load_packet(
    path: &Path,
    introspector: &JsonJobIntrospector,
) -> Result<JobPacket<Value>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read(path).await?;
    let doc: Value = serde_json::from_slice(&raw)?;
    Ok(JobPacket::<Value>::from_document(&doc, introspector)?)
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_packet(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let mut config = NodeConfig::new(Duration::from_secs(args.budget_secs))
        .with_exit_when_idle(args.exit_when_idle)
        .with_scheduler(
            SchedulerConfig::default()
                .with_safety_margin(Duration::from_secs(args.safety_margin_secs)),
        )
        .with_executor(ExecutorConfig {
            shell: args.shell,
            default_timeout: Duration::from_secs(args.default_timeout_secs),
            ..ExecutorConfig::default()
        });
    if let Some(addr) = dashboard_addr {
        config = config.with_dashboard(addr);
    }

    let (node, rx) = Node::new(config);
    let packet = load_packet(&args.packet, &node.introspector()).await?;
    let target = args.target.unwrap_or_else(|| packet.next().to_string());

    tracing::info!(
        packet_id = packet.id(),
        jobs = packet.num_jobs(),
        max_batch = packet.max_batch(),
        stage = %target,
        budget_secs = args.budget_secs,
        dashboard_addr = ?dashboard_addr,
        "Starting geoetl-relay node"
    );

    let shutdown = install_shutdown_handler()?;
    node.submit(packet, &target).await?;
    node.run(rx, shutdown).await;

    Ok(())
}

async fn split_packet(args: SplitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let introspector = JsonJobIntrospector::default();
    let packet = load_packet(&args.packet, &introspector).await?;
    let total_jobs = packet.num_jobs();
    let max_batch = packet.max_batch();

    let partitions: Vec<PartitionOutput> =
        create_packets(packet, &ClusterJob::timestamp_now())
            .iter()
            .map(|p| PartitionOutput {
                job: p.job().clone(),
                jobs: p.num_jobs(),
            })
            .collect();

    match args.output {
        OutputFormat::Json => {
            let output = SplitOutput {
                total_jobs,
                max_batch,
                partitions,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "{} jobs, {} per batch, {} partition(s)",
                total_jobs,
                max_batch,
                calc_packets(total_jobs, max_batch).max(1)
            );
            println!("{:<6} {:<6} {:<38} {:<6}", "PART", "LAST", "JOB ID", "JOBS");
            for partition in partitions {
                println!(
                    "{:<6} {:<6} {:<38} {:<6}",
                    partition.job.part, partition.job.last, partition.job.id, partition.jobs
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_packet(run_args).await?,
        Commands::Split(split_args) => split_packet(split_args).await?,
    }

    Ok(())
}
