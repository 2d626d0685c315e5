mod config;
mod demo_agents;

use agentmesh_orchestrator::Orchestrator;
use clap::{Parser, Subcommand};
use config::{CliConfig, WorkflowFile};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentmesh", about = "agentmesh: agent orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentmesh.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition file (JSON)
    Run {
        /// Workflow file: a list of steps or {"name", "description", "steps"}
        workflow: PathBuf,
        /// Scan interval in milliseconds (overrides config)
        #[arg(long)]
        scan_interval_ms: Option<u64>,
    },
    /// Run one health check pass and print the system status
    Status,
    /// List the configured agents and their capabilities
    Agents,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_orchestrator(config: &CliConfig) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::new(config.orchestrator.clone())?;
    for spec in &config.agents {
        orchestrator
            .register_agent(spec.build(), &spec.category)
            .await?;
    }
    info!(agents = config.agents.len(), "Agents registered");
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = CliConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run {
            workflow,
            scan_interval_ms,
        } => {
            if let Some(ms) = scan_interval_ms {
                config.orchestrator.scan_interval_ms = ms;
            }
            let (name, description, steps) =
                WorkflowFile::load(&workflow).await?.into_parts(&workflow);

            let orchestrator = build_orchestrator(&config).await?;
            orchestrator.start();

            let workflow_id = orchestrator
                .create_named_workflow(&name, &description, steps)
                .await;
            let outcome = orchestrator.execute_workflow(workflow_id).await;
            let snapshot = orchestrator.workflow(workflow_id).await;
            orchestrator.stop().await;

            if let Some(snapshot) = &snapshot {
                println!("{}", serde_json::to_string_pretty(snapshot)?);
            }
            match outcome {
                Ok(results) => {
                    info!(workflow_id = %workflow_id, steps = results.len(), "Workflow finished");
                }
                Err(e) => {
                    error!(workflow_id = %workflow_id, error = %e, "Workflow failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Status => {
            let orchestrator = build_orchestrator(&config).await?;
            let summary = orchestrator.check_health().await;
            info!(
                healthy = summary.healthy,
                unhealthy = summary.unhealthy,
                "Health check complete"
            );
            let status = orchestrator.system_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            orchestrator.stop().await;
        }
        Commands::Agents => {
            let orchestrator = build_orchestrator(&config).await?;
            let agents = orchestrator.agents().await;
            if agents.is_empty() {
                println!("No agents configured.");
                println!("Configure agents in agentmesh.toml under [[agents]]");
            } else {
                println!("Registered agents:");
                for agent in &agents {
                    println!("  {} [{}] {}", agent.agent_id, agent.category, agent.status);
                    if !agent.config.description.is_empty() {
                        println!("    {}", agent.config.description);
                    }
                    println!("    Operations: {}", agent.capabilities.join(", "));
                }
                println!("\nTotal: {} agent(s)", agents.len());
            }
            orchestrator.stop().await;
        }
    }

    Ok(())
}
