mod adapters;
#[cfg(feature = "redis")]
mod cache;
mod console;
mod health;
mod prompt;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stagehand_core::adapter::{Hosted, StartRegistry};
use stagehand_core::command::CommandRegistry;
use stagehand_core::config::AppHostConfig;
use stagehand_core::graph::Graph;
use stagehand_core::model::{EdgeKind, LaunchKind};
use stagehand_core::parameter::{EnvProvider, ParameterStore};
use stagehand_core::reducer::reduce;
use stagehand_core::sequencer::{SequenceReport, Sequencer, SequencerOptions, StartupOutcome};
use stagehand_core::state::RuntimeState;

use adapters::ProcessStarter;
use console::Console;
use health::NetworkProber;
use prompt::PromptProvider;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Declare, start and operate local application resources", long_about = None)]
struct Cli {
    /// App host file (default: discover stagehand.yaml upwards from the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the app host file
    Check,
    /// Print start waves and edges
    Graph {
        #[arg(long)]
        json: bool,
    },
    /// Start every resource in dependency order and open the operator console
    Up {
        /// Ask on the terminal for parameters nothing else provides
        #[arg(long)]
        prompt: bool,
        /// Override the startup deadline (milliseconds)
        #[arg(long)]
        deadline: Option<u64>,
        /// Exit after startup instead of opening the console
        #[arg(long)]
        no_console: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagehand=info,stagehand_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<(PathBuf, AppHostConfig)> {
    match path {
        Some(path) => {
            let config = AppHostConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Ok((path, config))
        }
        None => {
            let cwd = std::env::current_dir().context("no working directory")?;
            Ok(AppHostConfig::discover(&cwd)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let (path, config) = load_config(cli.config)?;
    tracing::debug!(config = %path.display(), "loaded app host");

    match cli.command {
        Commands::Check => check(&path, &config),
        Commands::Graph { json } => print_graph(&config, json),
        Commands::Up {
            prompt,
            deadline,
            no_console,
        } => {
            let span = tracing::info_span!("up", session = %uuid::Uuid::new_v4());
            up(config, prompt, deadline, no_console).instrument(span).await
        }
    }
}

fn check(path: &std::path::Path, config: &AppHostConfig) -> Result<()> {
    let graph = config.build(&mut ParameterStore::new())?;
    println!(
        "{}: {} parameters, {} resources, {} start waves",
        path.display(),
        config.parameters.len(),
        config.resources.len(),
        graph.start_waves().len()
    );
    Ok(())
}

fn print_graph(config: &AppHostConfig, json: bool) -> Result<()> {
    let graph = config.build(&mut ParameterStore::new())?;

    if json {
        let resources: BTreeMap<_, _> = graph
            .resources()
            .map(|r| {
                (
                    r.id.clone(),
                    serde_json::json!({
                        "kind": r.kind,
                        "lifetime": r.lifetime,
                        "probes": r.probes.len(),
                    }),
                )
            })
            .collect();
        let edges: Vec<_> = graph.edges().collect();
        let out = serde_json::json!({
            "name": config.name,
            "resources": resources,
            "edges": edges,
            "waves": graph.start_waves(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (i, wave) in graph.start_waves().iter().enumerate() {
        println!("wave {}: {}", i, wave.join(", "));
    }
    for edge in graph.edges() {
        let arrow = match edge.kind {
            EdgeKind::Wiring => "reads",
            EdgeKind::ReadinessWait => "waits for",
        };
        println!("  {} {} {}", edge.from, arrow, edge.to);
    }
    Ok(())
}

fn start_actions() -> StartRegistry {
    #[cfg(feature = "docker")]
    let containers = Arc::new(adapters::ContainerStarter::new());
    #[cfg(not(feature = "docker"))]
    let containers = Arc::new(adapters::ContainersUnavailable);

    StartRegistry::new()
        .with(LaunchKind::Process, Arc::new(ProcessStarter::new()))
        .with(LaunchKind::Container, containers)
        .with(LaunchKind::Hosted, Arc::new(Hosted))
}

fn register_commands(
    config: &AppHostConfig,
    registry: &CommandRegistry,
) -> Result<()> {
    for (resource, res) in &config.resources {
        for name in &res.commands {
            match name.as_str() {
                #[cfg(feature = "redis")]
                stagehand_core::clear_cache::CLEAR_CACHE_NAME => {
                    let command = stagehand_core::clear_cache::clear_cache_command(Arc::new(
                        cache::RedisConnector,
                    ));
                    registry.register(resource, command)?;
                }
                other => {
                    tracing::warn!(resource = %resource, command = %other, "command not available in this build");
                }
            }
        }
    }
    Ok(())
}

fn print_report(graph: &Graph, report: &SequenceReport) {
    for (id, outcome) in &report.outcomes {
        let health = graph.health(id).unwrap_or_default();
        let detail = match outcome {
            StartupOutcome::Healthy | StartupOutcome::AlreadyHealthy => String::new(),
            StartupOutcome::StartFailed { reason } => format!(" ({})", reason),
            StartupOutcome::TimedOut => " (timed out)".into(),
            StartupOutcome::Blocked => " (blocked)".into(),
        };
        println!("  {} {:<20} {}{}", health.icon(), id, health, detail);
    }
    for resource in graph.resources() {
        if let Some(endpoint) = resource.endpoint.as_ref().filter(|e| e.external) {
            if let Some(url) = endpoint.url("") {
                println!("  {} -> {}", resource.id, url);
            }
        }
    }
    for failure in &report.failures {
        eprintln!("  ! {}", failure);
    }
}

async fn up(config: AppHostConfig, prompt: bool, deadline: Option<u64>, no_console: bool) -> Result<()> {
    let input = prompt::stdin_lines();
    let mut store = ParameterStore::new()
        .with_provider(EnvProvider::new())
        .with_provider(config.defaults());
    if prompt {
        let descriptions = config
            .parameters
            .iter()
            .filter_map(|(name, p)| p.description.clone().map(|d| (name.clone(), d)))
            .collect();
        store.add_provider(Box::new(PromptProvider::new(input.clone(), descriptions)));
    }

    let graph = config.build(&mut store)?;
    let params = store
        .resolve_all()
        .await
        .context("set it as PARAMETERS__<NAME> or rerun with --prompt")?;

    let state = Arc::new(Mutex::new(RuntimeState::new()));
    let mut events = graph.events().subscribe();
    let reducer_state = state.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(env) => reduce(&mut reducer_state.lock().unwrap_or_else(|e| e.into_inner()), &env),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event reducer lagged");
                }
                Err(_) => break,
            }
        }
    });

    let options = SequencerOptions {
        deadline: deadline
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.startup_deadline()),
    };
    let sequencer = Arc::new(
        Sequencer::new(
            graph.clone(),
            Arc::new(start_actions()),
            Arc::new(NetworkProber::new()),
            params.clone(),
        )
        .with_options(options),
    );
    let registry = Arc::new(CommandRegistry::new(graph.clone(), params));
    register_commands(&config, &registry)?;

    let ctrl_c = CancellationToken::new();
    let ctrl_c_token = ctrl_c.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let report = tokio::select! {
        report = sequencer.run() => report,
        _ = ctrl_c.cancelled() => {
            tracing::warn!("interrupted during startup");
            registry.close();
            sequencer.shutdown().await;
            bail!("interrupted");
        }
    };
    print_report(&graph, &report);

    if !no_console {
        let console = Console {
            sequencer: sequencer.clone(),
            registry: registry.clone(),
            state,
            input,
        };
        console.run(ctrl_c).await;
    }

    registry.close();
    sequencer.shutdown().await;

    if !report.is_success() {
        bail!("{} resource(s) failed to start", report.failures.len());
    }
    Ok(())
}
