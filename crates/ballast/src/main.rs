use ballast_core::{CacheConfig, ClassifierConfig, ResolverConfig, CAPACITY_LABEL};
use ballast_extender::{AppState, Config as ExtenderConfig, ExtenderServer};
use ballast_runtime::{
    ApiClient, ApiClientConfig, BackoffPolicy, NodeWatcher, NodeWatcherConfig,
    ReactionController, ReactionControllerConfig,
};
use ballast_scheduler::{DecisionEngine, EngineConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "ballast",
    about = "Capacity-aware placement and displacement for spot and on-demand nodes"
)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "BALLAST_LOG_FORMAT")]
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
    /// Run the scheduler extender only
    Extender {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        decision: DecisionArgs,
        #[command(flatten)]
        extender: ExtenderArgs,
    },
    /// Run the capacity-loss reaction controller only
    Controller {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        decision: DecisionArgs,
        #[command(flatten)]
        controller: ControllerArgs,
    },
    /// Run the extender and the controller in one process
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        decision: DecisionArgs,
        #[command(flatten)]
        extender: ExtenderArgs,
        #[command(flatten)]
        controller: ControllerArgs,
    },
}

#[derive(Args, Clone)]
struct ClusterArgs {
    /// API server URL; the in-cluster service account is used when unset
    #[arg(long, env = "BALLAST_API_URL")]
    api_url: Option<String>,
    /// File holding a bearer token
    #[arg(long, env = "BALLAST_TOKEN_FILE")]
    token_file: Option<PathBuf>,
    /// PEM bundle used to verify the API server
    #[arg(long, env = "BALLAST_CA_FILE")]
    ca_file: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct DecisionArgs {
    /// Node label carrying the capacity class
    #[arg(long, default_value = CAPACITY_LABEL, env = "BALLAST_CAPACITY_LABEL")]
    capacity_label: String,
    /// Taint key that marks a node as about to be reclaimed
    #[arg(long, env = "BALLAST_TERMINATION_TAINT")]
    termination_taint: Option<String>,
    /// Deadline for each workload lookup, in milliseconds
    #[arg(long, default_value_t = 2000, env = "BALLAST_LOOKUP_TIMEOUT_MS")]
    lookup_timeout_ms: u64,
}

#[derive(Args, Clone)]
struct ExtenderArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8888", env = "BALLAST_BIND")]
    bind: String,
    /// Replica count cache TTL in seconds; 0 disables the cache
    #[arg(long, default_value_t = 0, env = "BALLAST_CACHE_TTL_SECS")]
    cache_ttl_secs: u64,
}

#[derive(Args, Clone)]
struct ControllerArgs {
    /// Attempts per pod eviction, including the first
    #[arg(long, default_value_t = 5, env = "BALLAST_EVICTION_ATTEMPTS")]
    eviction_attempts: u32,
    /// Initial retry delay in milliseconds
    #[arg(long, default_value_t = 200, env = "BALLAST_BACKOFF_BASE_MS")]
    backoff_base_ms: u64,
    /// Maximum retry delay in milliseconds
    #[arg(long, default_value_t = 10_000, env = "BALLAST_BACKOFF_MAX_MS")]
    backoff_max_ms: u64,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    let token = CancellationToken::new();
    let mut handles = Vec::new();

    match cli.command {
        Commands::Extender {
            cluster,
            decision,
            extender,
        } => {
            let client = connect(&cluster)?;
            handles.push(spawn_extender(client, &decision, &extender, &token)?);
        }
        Commands::Controller {
            cluster,
            decision,
            controller,
        } => {
            let client = connect(&cluster)?;
            handles.extend(spawn_controller(client, &decision, &controller, &token));
        }
        Commands::Run {
            cluster,
            decision,
            extender,
            controller,
        } => {
            let client = connect(&cluster)?;
            handles.push(spawn_extender(client.clone(), &decision, &extender, &token)?);
            handles.extend(spawn_controller(client, &decision, &controller, &token));
        }
    }

    info!("All components started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, join_handles(handles)).await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Build the API client from explicit flags, or from the service account
fn connect(args: &ClusterArgs) -> miette::Result<Arc<ApiClient>> {
    let config = match &args.api_url {
        Some(url) => {
            ApiClientConfig::from_files(url, args.token_file.as_deref(), args.ca_file.as_deref())?
        }
        None => ApiClientConfig::in_cluster()?,
    };

    info!("Using API server at {}", config.base_url);
    Ok(Arc::new(ApiClient::new(config)?))
}

fn classifier_config(args: &DecisionArgs) -> ClassifierConfig {
    ClassifierConfig {
        capacity_label: args.capacity_label.clone(),
        termination_taint: args.termination_taint.clone(),
    }
}

fn spawn_extender(
    client: Arc<ApiClient>,
    decision: &DecisionArgs,
    args: &ExtenderArgs,
    token: &CancellationToken,
) -> miette::Result<JoinHandle<()>> {
    let listen_addr = args
        .bind
        .parse()
        .map_err(|e| miette::miette!("Invalid bind address '{}': {}", args.bind, e))?;

    let cache = (args.cache_ttl_secs > 0).then(|| CacheConfig {
        ttl: Duration::from_secs(args.cache_ttl_secs),
        ..Default::default()
    });

    let engine = DecisionEngine::new(
        client,
        EngineConfig {
            classifier: classifier_config(decision),
            resolver: ResolverConfig {
                lookup_timeout: Duration::from_millis(decision.lookup_timeout_ms),
                cache,
            },
        },
    );

    let state = Arc::new(AppState::new(Arc::new(engine)));
    let server = ExtenderServer::new(ExtenderConfig { listen_addr }, state);
    let server_token = token.clone();

    Ok(tokio::spawn(async move {
        if let Err(e) = server.run(server_token).await {
            error!("Scheduler extender error: {}", e);
        }
    }))
}

fn spawn_controller(
    client: Arc<ApiClient>,
    decision: &DecisionArgs,
    args: &ControllerArgs,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(256);

    let watcher = NodeWatcher::new(client.clone(), NodeWatcherConfig::default());
    let watcher_token = token.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(tx, watcher_token).await {
            error!("Node watcher error: {}", e);
        }
    });

    let controller = ReactionController::new(
        client.clone(),
        client,
        ReactionControllerConfig {
            classifier: classifier_config(decision),
            resolver: ResolverConfig {
                lookup_timeout: Duration::from_millis(decision.lookup_timeout_ms),
                cache: None,
            },
            backoff: BackoffPolicy {
                max_attempts: args.eviction_attempts,
                base: Duration::from_millis(args.backoff_base_ms),
                max: Duration::from_millis(args.backoff_max_ms),
            },
        },
    );
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(rx, controller_token).await {
            error!("Reaction controller error: {}", e);
        }
    });

    vec![watcher_handle, controller_handle]
}

async fn join_handles(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task failed: {}", e);
        }
    }
}
