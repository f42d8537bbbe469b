use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hive_ci::agent::{BuildAgent, DockerExecutor};
use hive_ci::config::{NodeConfig, SandboxConfig};
use hive_ci::coordinator::CoreNode;
use hive_ci::results::parser::parse_test_report;
use hive_ci::shutdown::install_shutdown_handler;
use hive_ci::substrate::LocalCluster;

#[derive(Parser, Debug)]
#[command(name = "hive-ci")]
#[command(version)]
#[command(about = "Distributed CI build orchestration: core node plus a pool of build agents")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a core node with a pool of in-process build agents
    Serve(ServeArgs),

    /// Parse a JUnit XML report file and print the normalized outcome
    ParseReport {
        /// Path to the XML report
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Node name reported to the cluster
    #[arg(long, default_value = "core-1")]
    name: String,

    /// Address reported to the cluster
    #[arg(long, default_value = "127.0.0.1:5701")]
    address: String,

    /// Number of build agents to run
    #[arg(long, default_value = "2")]
    agents: usize,

    /// Container memory limit (e.g. "2g"), empty to disable
    #[arg(long, default_value = "2g")]
    memory_limit: String,

    /// Container CPU limit (e.g. "2"), empty to disable
    #[arg(long, default_value = "2")]
    cpu_limit: String,

    /// Allow network access inside build containers
    #[arg(long)]
    allow_network: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Serve(serve) => run_serve(serve).await,
        Commands::ParseReport { path } => {
            let xml = std::fs::read_to_string(&path)?;
            let report = parse_test_report(&xml);
            for outcome in &report.successful {
                println!("PASS {}", outcome.name);
            }
            for outcome in &report.failed {
                println!(
                    "FAIL {}: {}",
                    outcome.name,
                    outcome.messages.first().map(String::as_str).unwrap_or("")
                );
            }
            println!(
                "{} passed, {} failed",
                report.successful.len(),
                report.failed.len()
            );
            Ok(())
        }
    }
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = SandboxConfig {
        network_disabled: !args.allow_network,
        memory_limit: (!args.memory_limit.is_empty()).then_some(args.memory_limit.clone()),
        cpu_limit: (!args.cpu_limit.is_empty()).then_some(args.cpu_limit.clone()),
    };
    let config = NodeConfig {
        node_name: args.name.clone(),
        node_address: args.address.clone(),
        sandbox: sandbox.clone(),
        ..Default::default()
    };

    let shutdown = install_shutdown_handler();
    let cluster = LocalCluster::new();

    let core_substrate = cluster.member(&args.address);
    core_substrate.connect();
    let core = CoreNode::new(core_substrate, &config);
    core.watch_agent_disconnects();

    for index in 0..args.agents {
        let agent_name = format!("{}-agent-{}", args.name, index + 1);
        let agent_substrate = cluster.client(&agent_name);
        agent_substrate.connect();
        let agent_config = NodeConfig {
            node_name: agent_name,
            node_address: args.address.clone(),
            ..config.clone()
        };
        let agent = BuildAgent::new(
            &agent_substrate,
            &agent_config,
            DockerExecutor::new(sandbox.clone()),
        );
        let agent_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.run(agent_shutdown).await {
                tracing::error!(error = %e, "Build agent exited with error");
            }
            agent_substrate.disconnect();
        });
    }

    // Consumed results go to the log until grading storage is wired in.
    let (downstream_tx, mut downstream_rx) = tokio::sync::mpsc::channel::<hive_ci::results::BuildResultMessage>(64);
    tokio::spawn(async move {
        while let Some(message) = downstream_rx.recv().await {
            tracing::info!(
                job_id = %message.job_id,
                successful = message.result.successful,
                has_logs = message.result.has_logs(),
                "Build result ready for grading"
            );
        }
    });

    core.run_results(shutdown, downstream_tx).await?;
    Ok(())
}
