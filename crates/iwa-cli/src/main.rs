//! IWA - evaluation environment orchestration CLI
//!
//! The `iwa` command builds and runs the env and model containers on a
//! shared network and checks that they come up healthy.
//!
//! ## Commands
//!
//! - `build`: Build images
//! - `start` (`run`): Ensure the network, replace containers, wait for health
//! - `stop` (`clean`): Remove containers and the network
//! - `restart`: `stop` then `start`
//! - `all`: Build, start and smoke test `/evaluate`
//! - `status`: Show container state and health
//! - `logs`: Print recent container logs

mod smoke;
mod stack;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iwa_core::{
    build_service, ensure_network, remove_network, run_service, stop_services, ContainerRuntime,
    DockerCli, ReadinessPoller, Registry,
};
use tracing::{info, Level};

use crate::smoke::SmokeTest;
use crate::stack::{select, StackArgs};

#[derive(Parser)]
#[command(name = "iwa")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "IWA evaluation environment orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    stack: StackArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build service images
    Build {
        /// Only this service (logical or container name)
        service: Option<String>,
    },

    /// Start services on the shared network and wait until healthy
    #[command(alias = "run")]
    Start {
        /// Only this service (logical or container name)
        service: Option<String>,

        /// Reuse existing images instead of building first
        #[arg(long)]
        no_build: bool,
    },

    /// Remove service containers and the network
    #[command(alias = "clean")]
    Stop,

    /// Stop, then start every service
    Restart {
        /// Reuse existing images instead of building first
        #[arg(long)]
        no_build: bool,
    },

    /// Build, start, wait, then smoke test /evaluate
    All {
        /// Task id to evaluate (repeatable)
        #[arg(long = "smoke-task", default_values_t = [
            "autobooks-demo-task-1".to_string(),
            "autobooks-demo-task-2-invalid".to_string(),
        ])]
        smoke_tasks: Vec<String>,

        /// Model identifier sent to /evaluate
        #[arg(long, default_value = "hardcoded-model")]
        smoke_model: String,

        /// Model base URL as seen from the env container
        #[arg(long)]
        smoke_model_url: Option<String>,

        /// Step budget per smoke task
        #[arg(long, default_value_t = 5)]
        smoke_max_steps: i64,

        /// Seconds to wait for each /evaluate call
        #[arg(long, default_value_t = 120)]
        smoke_timeout_secs: u64,
    },

    /// Show container state and health
    Status,

    /// Print recent container logs
    Logs {
        /// Only this service (logical or container name)
        service: Option<String>,

        /// Number of lines from the end
        #[arg(short = 'n', long, default_value_t = 100)]
        tail: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    iwa_core::init_tracing(cli.json, level);

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::from_env());
    let stack = cli.stack;
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    match cli.command {
        Commands::Build { service } => {
            let registry = stack.registry(true, env)?;
            cmd_build(runtime.as_ref(), &registry, service.as_deref()).await
        }
        Commands::Start { service, no_build } => {
            let mut registry = stack.registry(!no_build, env)?;
            cmd_start(runtime, &stack, &mut registry, service.as_deref()).await
        }
        Commands::Stop => {
            let mut registry = stack.registry(false, env)?;
            cmd_stop(runtime.as_ref(), &mut registry).await
        }
        Commands::Restart { no_build } => {
            let mut registry = stack.registry(!no_build, env)?;
            cmd_stop(runtime.as_ref(), &mut registry).await?;
            cmd_start(runtime, &stack, &mut registry, None).await
        }
        Commands::All {
            smoke_tasks,
            smoke_model,
            smoke_model_url,
            smoke_max_steps,
            smoke_timeout_secs,
        } => {
            let mut registry = stack.registry(true, env)?;
            cmd_start(runtime, &stack, &mut registry, None).await?;
            let smoke = SmokeTest {
                env_url: stack.env_url(),
                model: smoke_model,
                model_base_url: smoke_model_url.unwrap_or_else(|| stack.model_url_in_network()),
                max_steps: smoke_max_steps,
                timeout: Duration::from_secs(smoke_timeout_secs),
            };
            cmd_smoke(&smoke, &smoke_tasks).await
        }
        Commands::Status => {
            let registry = stack.registry(false, env)?;
            cmd_status(runtime.as_ref(), &registry).await
        }
        Commands::Logs { service, tail } => {
            let registry = stack.registry(false, env)?;
            cmd_logs(runtime.as_ref(), &registry, service.as_deref(), tail).await
        }
    }
}

async fn cmd_build(
    runtime: &dyn ContainerRuntime,
    registry: &Registry,
    service: Option<&str>,
) -> Result<()> {
    for name in select(registry, service)? {
        build_service(runtime, registry, &name)
            .await
            .with_context(|| format!("Failed to build {name}"))?;
        println!("built {name}");
    }
    Ok(())
}

async fn cmd_start(
    runtime: Arc<dyn ContainerRuntime>,
    stack: &StackArgs,
    registry: &mut Registry,
    service: Option<&str>,
) -> Result<()> {
    ensure_network(runtime.as_ref(), registry.network())
        .await
        .context("Failed to ensure network")?;

    let names = select(registry, service)?;
    for name in &names {
        let handle = run_service(runtime.as_ref(), registry, name)
            .await
            .with_context(|| format!("Failed to start {name}"))?;
        info!(service = %name, container = %handle.name, id = %handle.id, "service started");
    }

    let poller = ReadinessPoller::new(runtime.clone(), stack.retry_policy());
    for name in &names {
        let Some(target) = registry.get(name).and_then(|s| s.readiness.clone()) else {
            continue;
        };
        let ready = poller
            .wait(&target)
            .await
            .with_context(|| format!("{name} did not become healthy"))?;
        println!(
            "{name} ready after {} attempt(s) ({}s)",
            ready.attempts,
            ready.waited.as_secs()
        );
    }
    Ok(())
}

async fn cmd_stop(runtime: &dyn ContainerRuntime, registry: &mut Registry) -> Result<()> {
    let removed = stop_services(runtime, registry)
        .await
        .context("Failed to remove containers")?;
    for name in &removed {
        println!("removed {name}");
    }
    if remove_network(runtime, registry.network())
        .await
        .context("Failed to remove network")?
    {
        println!("removed network {}", registry.network());
    }
    Ok(())
}

async fn cmd_smoke(smoke: &SmokeTest, task_ids: &[String]) -> Result<()> {
    let client = reqwest::Client::new();
    for task_id in task_ids {
        let result = smoke
            .run(&client, task_id)
            .await
            .with_context(|| format!("Smoke test for {task_id} failed"))?;
        for detail in &result.details {
            println!(
                "{}\tscore={:.2}\tsuccess={}\tsteps={}\ttests={}/{}",
                detail.task_id,
                detail.score,
                detail.success,
                detail.steps,
                detail.tests_passed,
                detail.total_tests
            );
        }
    }
    Ok(())
}

async fn cmd_status(runtime: &dyn ContainerRuntime, registry: &Registry) -> Result<()> {
    let network = runtime
        .network_exists(registry.network())
        .await
        .context("Failed to inspect network")?;
    println!(
        "network {}: {}",
        registry.network(),
        if network { "present" } else { "absent" }
    );

    for service in registry.services() {
        let name = service.container_name();
        match runtime
            .inspect_container(name)
            .await
            .with_context(|| format!("Failed to inspect {name}"))?
        {
            Some(status) => {
                let started = status
                    .started_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<8} {:<28} {:<10} health={:<9} started={}",
                    service.name,
                    name,
                    status.state.as_str(),
                    status.health.to_string(),
                    started
                );
            }
            None => println!("{:<8} {:<28} absent", service.name, name),
        }
    }
    Ok(())
}

async fn cmd_logs(
    runtime: &dyn ContainerRuntime,
    registry: &Registry,
    service: Option<&str>,
    tail: usize,
) -> Result<()> {
    for name in select(registry, service)? {
        let Some(spec) = registry.get(&name) else {
            continue;
        };
        let container = spec.container_name();
        println!("==> {container} <==");
        match runtime.logs(container, tail).await {
            Ok(logs) => println!("{logs}"),
            Err(e) if e.is_not_found() => println!("(container not found)"),
            Err(e) => return Err(e).with_context(|| format!("Failed to read logs of {container}")),
        }
    }
    Ok(())
}
