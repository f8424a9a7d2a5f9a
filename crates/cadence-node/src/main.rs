use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use cadence_core::CadenceConfig;
use cadence_scheduler::{JobService, SchedulerHandle, SchedulerOptions, Store};
use cadence_security::PermissionCache;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod app;
mod http;
mod jobs;

#[derive(Parser)]
#[command(name = "cadence-node", version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CADENCE_GIT_SHA"), ")"))]
#[command(about = "Fleet member: runs scheduled jobs and serves the admin API")]
struct Cli {
    /// Config file; defaults to $CADENCE_CONFIG, then ~/.cadence/cadence.toml.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the admin API (default).
    Run,
    /// Ask a server to run a job on its next tick.
    Trigger {
        job: String,
        /// Target server; this node's name when absent.
        #[arg(long)]
        server: Option<String>,
    },
    /// Print the job registry.
    Jobs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_node=info,cadence_scheduler=info,cadence_security=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    ensure_parent_dir(&config.database.path)?;
    info!(path = %config.database.path, "opening SQLite database");
    let store = Store::open(&config.database.path)?;
    cadence_security::db::init_db(&store.conn())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Trigger { job, server } => {
            let server = server.unwrap_or_else(|| config.server.name.clone());
            let id = SchedulerHandle::new(store).request_run(&server, &job)?;
            println!("trigger {id}: {job} on {server}");
            Ok(())
        }
        Command::Jobs => {
            for job in SchedulerHandle::new(store).list_jobs()? {
                let last = job.last_execution.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string());
                let state = if job.active { "active" } else { "paused" };
                println!("{:<32} {:<12} {:<7} last run {}", job.name, job.queue, state, last);
            }
            Ok(())
        }
    }
}

async fn run(config: CadenceConfig, store: Store) -> anyhow::Result<()> {
    let server = config.server.name.clone();

    let permissions = Arc::new(PermissionCache::new());
    permissions.load(&store.conn())?;

    let registry = jobs::build_registry(&config, Arc::clone(&permissions))?;
    let report = registry.reconcile(&store.conn())?;
    info!(
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        "job registry reconciled"
    );

    let service = JobService::new(
        &server,
        store.clone(),
        Arc::new(registry),
        SchedulerOptions::from(&config.scheduler),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let service_task = tokio::spawn(service.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    let state = Arc::new(app::AppState::new(config, SchedulerHandle::new(store), permissions));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%server, "Cadence node listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // let in-flight ticks finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = service_task.await {
        warn!(error = %e, "job service task ended abnormally");
    }
    info!("Cadence node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) -> cadence_core::Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
