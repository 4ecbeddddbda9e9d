use std::{process, sync::Arc, time::Duration};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use usercache::{
    application::{
        auth::{AuthorizationGate, SelfAccessGate},
        error::AppError,
        repos::{UsersRepo, UsersWriteRepo},
        users::UserService,
    },
    cache::{CacheAside, CacheConfig, CacheStore, MemoryCacheStore, RedisCacheStore},
    config::{self, CacheBackendKind},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState, JwtVerifier},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("Migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let jwt_secret = settings
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| InfraError::configuration("auth.jwt_secret is not configured"))?;

    let repositories = init_repositories(&settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let cache_config = CacheConfig::from(&settings.cache);
    let store = init_cache_store(&settings.cache, &cache_config).await?;

    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let users_write_repo: Arc<dyn UsersWriteRepo> = repositories.clone();
    let gate: Arc<dyn AuthorizationGate> = Arc::new(SelfAccessGate);

    let coordinator = Arc::new(CacheAside::new(
        cache_config,
        store,
        users_repo.clone(),
        settings.database.timeout,
    ));
    let users = Arc::new(UserService::new(
        coordinator,
        users_write_repo,
        gate,
        settings.database.timeout,
    ));

    let state = HttpState {
        users,
        health: users_repo,
        verifier: Arc::new(JwtVerifier::new(jwt_secret)),
    };

    serve_http(&settings, state).await
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn init_cache_store(
    settings: &config::CacheSettings,
    cache_config: &CacheConfig,
) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.backend {
        CacheBackendKind::Memory => {
            info!(
                capacity = cache_config.memory_capacity,
                "Using in-process cache store"
            );
            Ok(Arc::new(MemoryCacheStore::new(cache_config)))
        }
        CacheBackendKind::Redis => {
            let store =
                RedisCacheStore::connect(&settings.host, settings.port, settings.io_timeout)
                    .map_err(|err| AppError::from(InfraError::cache(err.to_string())))?;
            // An unreachable cache degrades reads to the database; it does not block startup.
            if let Err(err) = store.ping().await {
                warn!(
                    host = %settings.host,
                    port = settings.port,
                    error = %err,
                    "Redis is not reachable; requests will fall back to the database"
                );
            }
            Ok(Arc::new(store))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "HTTP server listening");

    let server = async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
    };
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = shutdown_deadline(grace) => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out; exiting");
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn shutdown_deadline(grace: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(grace).await;
}
