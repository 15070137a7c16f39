mod api;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wv_core::workload::WorkloadThresholds;
use wv_ingest::client::DEFAULT_UPSTREAM_URL;
use wv_ingest::{HttpTaskSource, IngestionSync, SyncConfig, TaskSource, UpstreamConfig};
use wv_storage::WorkloadStore;
use wv_workload::{SystemClock, WorkloadAggregator};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const LOG_FILE_NAME: &str = "wv-hub.log";

#[derive(Parser, Debug)]
#[command(name = "wv-hub")]
#[command(about = "Workload visibility hub", long_about = None)]
struct Cli {
    #[command(flatten)]
    args: HubArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct HubArgs {
    #[arg(long, env = "WV_ADDR", default_value = DEFAULT_ADDR, global = true)]
    addr: String,
    #[arg(long, env = "WV_DB_PATH", default_value = "workload.db", global = true)]
    db_path: PathBuf,
    #[arg(long, env = "WV_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL, global = true)]
    upstream_url: String,
    #[arg(long, env = "WV_UPSTREAM_TOKEN", default_value = "", hide_env_values = true, global = true)]
    upstream_token: String,
    #[arg(long, env = "WV_UPSTREAM_TIMEOUT_SECS", default_value_t = 20, global = true)]
    upstream_timeout_secs: u64,
    #[arg(long, env = "WV_ORG_ID", global = true)]
    org_id: Option<String>,
    #[arg(long, env = "WV_API_TOKEN", hide_env_values = true, global = true)]
    api_token: Option<String>,
    #[arg(long, env = "WV_UNDERLOAD_MAX", default_value_t = 35.0, global = true)]
    underload_max: f64,
    #[arg(long, env = "WV_NORMAL_MIN", default_value_t = 36.0, global = true)]
    normal_min: f64,
    #[arg(long, env = "WV_NORMAL_MAX", default_value_t = 45.0, global = true)]
    normal_max: f64,
    #[arg(long, env = "WV_OVERLOAD_MIN", default_value_t = 60.0, global = true)]
    overload_min: f64,
    /// Offset from UTC used to resolve calendar-day boundaries.
    #[arg(long, env = "WV_UTC_OFFSET_MINUTES", default_value_t = 0, global = true, allow_hyphen_values = true)]
    utc_offset_minutes: i32,
    #[arg(long, env = "WV_LOG_DIR", default_value = "", global = true)]
    log_dir: String,
    #[arg(long, env = "WV_DEBUG", default_value_t = false, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,
    /// Run one ingestion pass against the upstream and exit
    Sync {
        #[arg(long, value_enum, default_value_t = SyncTarget::All)]
        phase: SyncTarget,
    },
    /// Manage admin accounts
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommands {
    /// Create an admin, or reset the password of an existing one
    Add {
        username: String,
        #[arg(long, env = "WV_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SyncTarget {
    All,
    Teams,
    Members,
    Tasks,
}

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    db_path: PathBuf,
    upstream: UpstreamConfig,
    sync: SyncConfig,
    api_token: Option<String>,
    thresholds: WorkloadThresholds,
    offset: FixedOffset,
    log_dir: String,
    debug: bool,
}

fn load_config(args: HubArgs) -> Result<Config> {
    let offset = args
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .with_context(|| {
            format!(
                "utc offset of {} minutes is out of range",
                args.utc_offset_minutes
            )
        })?;
    let org_id = args
        .org_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    Ok(Config {
        addr: args.addr,
        db_path: args.db_path,
        upstream: UpstreamConfig {
            base_url: args.upstream_url,
            token: args.upstream_token,
            timeout: Duration::from_secs(args.upstream_timeout_secs),
        },
        sync: SyncConfig {
            org_id,
            ..SyncConfig::default()
        },
        api_token: args.api_token,
        thresholds: WorkloadThresholds {
            underload_max: args.underload_max,
            normal_min: args.normal_min,
            normal_max: args.normal_max,
            overload_min: args.overload_min,
        },
        offset,
        log_dir: args.log_dir,
        debug: args.debug,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.args)?;
    init_logging(&config);

    let store = WorkloadStore::open(&config.db_path)
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let store = Arc::new(Mutex::new(store));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, store).await,
        Commands::Sync { phase } => run_sync(&config, store, phase).await,
        Commands::Admin {
            action: AdminCommands::Add { username, password },
        } => {
            let username = username.trim();
            anyhow::ensure!(!username.is_empty(), "admin username must not be blank");
            store
                .lock()
                .upsert_admin(username, &password)
                .context("failed to store admin")?;
            info!(event = "admin_saved", username);
            println!("Saved admin {username}");
            Ok(())
        }
    }
}

fn ingestion(config: &Config, store: Arc<Mutex<WorkloadStore>>) -> Result<IngestionSync<Arc<dyn TaskSource>>> {
    let source: Arc<dyn TaskSource> = Arc::new(
        HttpTaskSource::new(&config.upstream).context("failed to build upstream client")?,
    );
    Ok(IngestionSync::new(source, store, config.sync.clone()))
}

async fn serve(config: Config, store: Arc<Mutex<WorkloadStore>>) -> Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;

    let aggregator = WorkloadAggregator::new(
        store.clone(),
        Arc::new(SystemClock),
        config.thresholds,
        config.offset,
    );
    let ingestion = ingestion(&config, store.clone())?;
    let state = Arc::new(api::AppState::new(
        store,
        aggregator,
        ingestion,
        config.api_token.clone(),
    ));
    if !state.auth_enabled() {
        warn!(event = "auth_disabled", "no api token configured; /api routes are open");
    }

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(event = "hub_start", addr = %addr, db_path = %config.db_path.display());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
        return Err(err.into());
    }
    info!(event = "hub_stop");
    Ok(())
}

async fn run_sync(config: &Config, store: Arc<Mutex<WorkloadStore>>, target: SyncTarget) -> Result<()> {
    let sync = ingestion(config, store)?;
    let report = match target {
        SyncTarget::All => serde_json::to_value(sync.sync_all().await?)?,
        SyncTarget::Teams => serde_json::to_value(sync.sync_teams().await?)?,
        SyncTarget::Members => serde_json::to_value(sync.sync_members().await?)?,
        SyncTarget::Tasks => serde_json::to_value(sync.sync_tasks().await?)?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_level(config: &Config) -> String {
    if config.debug {
        return "debug".to_string();
    }
    std::env::var("WV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// Logs to stdout, and additionally appends plain-text lines to
/// `<log_dir>/wv-hub.log` when a log directory is configured.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(config)));
    let file_layer = match open_log_file(&config.log_dir) {
        Ok(file) => file.map(|file| fmt::layer().with_ansi(false).with_writer(Arc::new(file))),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}

fn open_log_file(log_dir: &str) -> io::Result<Option<File>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .map(Some)
}
