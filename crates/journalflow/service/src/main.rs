use clap::{Parser, ValueEnum};
use journalflow_adapters::{HttpEndpoint, RemoteEndpoints};
use journalflow_core::{LedgerStorageConfig, DEFAULT_THEME};
use journalflow_service::{
    build_router, spawn_workers, RemoteConfig, ServiceConfig, ServiceState, TaskCreationMode,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    /// In-process fixtures for every remote system.
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskCreation {
    Enabled,
    Disabled,
}

#[derive(Debug, Parser)]
#[command(
    name = "journalflowd",
    version,
    about = "Journal entry workflow: links, finalizes and creates tasks for incoming journal entries"
)]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8084
    #[arg(long, default_value = "127.0.0.1:8084", env = "JOURNALFLOW_LISTEN")]
    listen: SocketAddr,
    #[arg(long, value_enum, default_value_t = Profile::Local, env = "JOURNALFLOW_PROFILE")]
    profile: Profile,
    /// Ledger persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Auto, env = "JOURNALFLOW_LEDGER_STORAGE")]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for the progress ledger.
    #[arg(long, env = "JOURNALFLOW_LEDGER_DATABASE_URL")]
    ledger_database_url: Option<String>,
    #[arg(long, default_value_t = 5, env = "JOURNALFLOW_LEDGER_PG_MAX_CONNECTIONS")]
    ledger_pg_max_connections: u32,
    /// Archive GraphQL base url (metadata lookup).
    #[arg(long, env = "JOURNALFLOW_ARCHIVE_QUERY_URL")]
    archive_query_url: Option<String>,
    /// Archive journal entry API base url (case binding, finalization).
    #[arg(long, env = "JOURNALFLOW_ARCHIVE_URL")]
    archive_url: Option<String>,
    #[arg(long, env = "JOURNALFLOW_PERSON_REGISTRY_URL")]
    person_registry_url: Option<String>,
    #[arg(long, env = "JOURNALFLOW_CASE_API_URL")]
    case_api_url: Option<String>,
    #[arg(long, env = "JOURNALFLOW_TASK_SERVICE_URL")]
    task_service_url: Option<String>,
    /// Bearer token sent to every remote system.
    #[arg(long, env = "JOURNALFLOW_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    #[arg(long, default_value_t = 30, env = "JOURNALFLOW_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: u64,
    /// Number of event partitions, one worker each.
    #[arg(long, default_value_t = 4, env = "JOURNALFLOW_PARTITIONS")]
    partitions: usize,
    #[arg(long, default_value_t = 256, env = "JOURNALFLOW_CHANNEL_CAPACITY")]
    channel_capacity: usize,
    /// Delay before a failed event is delivered again.
    #[arg(long, default_value_t = 5_000, env = "JOURNALFLOW_REDELIVERY_DELAY_MS")]
    redelivery_delay_ms: u64,
    /// Only events for this theme are processed.
    #[arg(long, default_value = DEFAULT_THEME, env = "JOURNALFLOW_THEME")]
    theme: String,
    #[arg(long, value_enum, default_value_t = TaskCreation::Enabled, env = "JOURNALFLOW_TASK_CREATION")]
    task_creation: TaskCreation,
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    let resolved_url = cli
        .ledger_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.ledger_storage {
        LedgerStorageMode::Memory => LedgerStorageConfig::Memory,
        LedgerStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "ledger_storage=postgres requires --ledger-database-url or DATABASE_URL"
                )
            })?;
            LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
        }
        LedgerStorageMode::Auto => match resolved_url {
            Some(database_url) => {
                LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
            }
            None => LedgerStorageConfig::Memory,
        },
    };

    if cli.profile == Profile::Prod && matches!(storage, LedgerStorageConfig::Memory) {
        anyhow::bail!("profile=prod requires a postgres ledger");
    }

    Ok(storage)
}

fn resolve_remotes(cli: &Cli) -> anyhow::Result<RemoteConfig> {
    if cli.profile == Profile::Local {
        return Ok(RemoteConfig::Fixture);
    }

    let endpoint = |value: &Option<String>, flag: &str| {
        value
            .as_deref()
            .map(HttpEndpoint::new)
            .ok_or_else(|| anyhow::anyhow!("profile {:?} requires --{flag}", cli.profile))
    };

    Ok(RemoteConfig::Http {
        endpoints: RemoteEndpoints {
            archive_query: endpoint(&cli.archive_query_url, "archive-query-url")?,
            archive: endpoint(&cli.archive_url, "archive-url")?,
            person_registry: endpoint(&cli.person_registry_url, "person-registry-url")?,
            case_api: endpoint(&cli.case_api_url, "case-api-url")?,
            task_service: endpoint(&cli.task_service_url, "task-service-url")?,
        },
        access_token: cli
            .access_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("profile {:?} requires --access-token", cli.profile))?,
        request_timeout: Duration::from_secs(cli.request_timeout_secs.max(1)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "journalflow_service=info,journalflow_core=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig {
        ledger_storage: resolve_ledger_storage(&cli)?,
        remotes: resolve_remotes(&cli)?,
        task_creation: match cli.task_creation {
            TaskCreation::Enabled => TaskCreationMode::Enabled,
            TaskCreation::Disabled => TaskCreationMode::Disabled,
        },
        theme: cli.theme.clone(),
        partitions: cli.partitions.max(1),
        channel_capacity: cli.channel_capacity.max(1),
        redelivery_delay: Duration::from_millis(cli.redelivery_delay_ms),
    };

    let (state, sources) = ServiceState::bootstrap(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(&state, sources, shutdown_rx);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(
        profile = ?cli.profile,
        "journalflow-service REST listening on {}",
        listener.local_addr()?
    );

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown_state.set_ready(false);
        })
        .await?;

    shutdown_tx.send(true).ok();
    for worker in workers {
        let stats = worker.await?;
        info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "worker drained"
        );
    }

    Ok(())
}
