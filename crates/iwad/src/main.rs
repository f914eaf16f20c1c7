//! `iwad` - IWA environment process.
//!
//! ## Commands
//!
//! - `serve`: bootstrap siblings/forwards, then serve `/health` and `/evaluate`
//! - `tasks`: validate a task file and list its tasks

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iwa_core::DockerCli;
use tracing::{info, warn, Level};

use iwad::{api, bootstrap_with_tokio, BootstrapPlan, HttpEvaluatorFactory, Orchestrator, ServeArgs, TaskStore};

#[derive(Parser)]
#[command(name = "iwad")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "IWA evaluation environment", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare sibling services and serve the evaluation API
    Serve(ServeArgs),

    /// Validate a task file and list its tasks
    Tasks {
        #[arg(long, env = "IWA_TASKS_FILE", default_value = "data/tasks.json")]
        tasks_file: PathBuf,
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

    match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,
        Commands::Tasks { tasks_file } => cmd_tasks(&tasks_file).await,
    }
}

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let plan = BootstrapPlan {
        siblings: args.siblings()?,
        wait_for: args.readiness_targets(),
        policy: args.retry_policy(),
        forwards: args.port_forwards()?,
        settle: args.forward_settle(),
        ..BootstrapPlan::default()
    };

    let mut forwards = None;
    if !plan.is_empty() {
        let runtime = Arc::new(DockerCli::from_env());
        let done = bootstrap_with_tokio(&plan, runtime)
            .await
            .context("Environment bootstrap failed")?;
        if let Some(outcome) = done.siblings {
            info!(?outcome, "sibling services");
        }
        forwards = Some(done.forwards);
    }

    let settings = args.settings();
    info!(
        tasks_file = %settings.tasks_file.display(),
        default_max_steps = settings.default_max_steps,
        headless = settings.headless,
        demo_webs_starting_port = settings.demo_webs_starting_port,
        demo_web_service_port = settings.demo_web_service_port,
        "environment configured"
    );

    let http = reqwest::Client::new();
    let evaluators = Arc::new(HttpEvaluatorFactory::new(http, settings.headless));
    let orchestrator = Arc::new(Orchestrator::new(settings, evaluators));
    if let Err(e) = orchestrator.tasks().await {
        warn!(error = %e, "task store not loadable yet; /evaluate will retry");
    }

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    api::serve(listener, api::router(orchestrator), api::shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(forwards) = forwards {
        forwards.shutdown();
    }
    info!("environment stopped");
    Ok(())
}

async fn cmd_tasks(path: &PathBuf) -> Result<()> {
    let store = TaskStore::load(path)
        .await
        .with_context(|| format!("Failed to load tasks from {}", path.display()))?;

    for task in store.tasks() {
        println!(
            "{}\t{}\t{} test(s)\t{}",
            task.id,
            task.web_project_id,
            task.total_tests(),
            task.url
        );
    }
    Ok(())
}
