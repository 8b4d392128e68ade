use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use corral_core::token::{IssueRequest, JwtTokenService};
use corral_events::{EventLog, InMemoryEventLog, PostgresEventLog, ResilientPublisher};
use corral_server::cli::{Cli, Command};
use corral_server::config::{AppConfig, LogFormat, StorageBackend};
use corral_server::metrics::{self, Metrics};
use corral_server::rest;
use corral_server::service::{self, PolicyEngine, PolicyService, Service};
use corral_storage::{
    InMemoryChannelCache, InMemoryPolicyCache, InMemoryStore, InMemoryThingCache, PostgresStore,
    Store,
};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        Some(Command::IssueToken { subject, role }) => {
            let request = IssueRequest::new(subject, role.into());
            match config.database.backend {
                StorageBackend::Memory => {
                    run_issue_token(
                        &config,
                        Arc::new(InMemoryStore::new()),
                        Arc::new(InMemoryEventLog::new()),
                        request,
                    )
                    .await
                }
                StorageBackend::Postgres => {
                    let pool = connect(&config).await?;
                    run_issue_token(
                        &config,
                        Arc::new(PostgresStore::new(pool.clone())),
                        Arc::new(PostgresEventLog::new(pool)),
                        request,
                    )
                    .await
                }
            }
        }
        Some(Command::Serve) | None => match config.database.backend {
            StorageBackend::Memory => {
                run_serve(
                    config,
                    Arc::new(InMemoryStore::new()),
                    Arc::new(InMemoryEventLog::new()),
                )
                .await
            }
            StorageBackend::Postgres => {
                let pool = connect(&config).await?;
                run_serve(
                    config,
                    Arc::new(PostgresStore::new(pool.clone())),
                    Arc::new(PostgresEventLog::new(pool)),
                )
                .await
            }
        },
    }
}

async fn connect(config: &AppConfig) -> Result<sqlx::PgPool, Box<dyn std::error::Error>> {
    let pool =
        corral_storage::postgres::connect(&config.database.url, config.database.max_connections)
            .await?;
    Ok(pool)
}

async fn run_migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("running database migrations");
    let pool = connect(config).await?;
    corral_storage::postgres::migrations::run_migrations(&pool).await?;
    corral_events::postgres::run_migrations(&pool).await?;
    tracing::info!("migrations completed successfully");
    Ok(())
}

fn build_service<S, L>(
    config: &AppConfig,
    store: Arc<S>,
    log: Arc<L>,
    metrics: Arc<Metrics>,
) -> (Service<S, L>, ResilientPublisher<L>)
where
    S: Store + 'static,
    L: EventLog,
{
    let tokens = Arc::new(JwtTokenService::new(
        config.token.secret.as_bytes(),
        config.token.issuer.clone(),
        config.access_ttl(),
        config.refresh_ttl(),
    ));
    let engine = PolicyEngine::new(
        store,
        tokens,
        InMemoryPolicyCache::new(Duration::from_secs(config.cache.policy_ttl_secs)),
        InMemoryThingCache::new(Duration::from_secs(config.cache.key_ttl_secs)),
        InMemoryChannelCache::new(Duration::from_secs(config.cache.connectivity_ttl_secs)),
    );
    let publisher = ResilientPublisher::new(log, config.to_publisher_config());
    let service = service::compose(engine, publisher.clone(), metrics);
    (service, publisher)
}

async fn run_issue_token<S, L>(
    config: &AppConfig,
    store: Arc<S>,
    log: Arc<L>,
    request: IssueRequest,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: Store + 'static,
    L: EventLog,
{
    let (service, publisher) = build_service(config, store, log, Arc::new(Metrics::new()));
    let token = service.issue(request).await?;

    if publisher.pending_len() > 0 {
        tracing::warn!(
            pending = publisher.pending_len(),
            "token issued but its event could not be recorded"
        );
    }

    println!("{}", serde_json::to_string_pretty(&token)?);
    Ok(())
}

async fn run_serve<S, L>(
    config: AppConfig,
    store: Arc<S>,
    log: Arc<L>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: Store + 'static,
    L: EventLog,
{
    tracing::info!(
        http_addr = %config.http_addr(),
        backend = ?config.database.backend,
        "starting corral server"
    );

    let metrics = Arc::new(Metrics::new());
    let (service, publisher) = build_service(&config, store, log, Arc::clone(&metrics));

    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    let mut publisher_rx = shutdown_tx.subscribe();
    let drain_task = publisher.spawn(async move {
        let _ = publisher_rx.changed().await;
    });

    let state = rest::AppState {
        service: Arc::new(service),
        metrics: Arc::clone(&metrics),
    };
    let router = rest::create_router(state).route(
        "/metrics",
        axum::routing::get(metrics::metrics_handler).with_state(Arc::clone(&metrics)),
    );

    let http_addr: std::net::SocketAddr = config.http_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(%http_addr, "REST server listening");

    let mut server_rx = shutdown_tx.subscribe();
    tokio::spawn(shutdown_signal(shutdown_tx.clone()));

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_rx.changed().await;
        })
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "REST server error");
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = drain_task.await {
        tracing::warn!(error = %e, "event publisher task failed");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }

    let _ = shutdown_tx.send(());
}
