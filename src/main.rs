use std::{process, sync::Arc};

use grafite::{
    application::{AppError, ImageService},
    cache::{self, CacheConfig},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{ApiState, build_router},
        storage::ImageStorage,
        telemetry,
    },
};
use grafite::application::render::Renderer;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

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
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let renderer = Renderer::from_settings(&settings.render);
    check_toolchain(&renderer)?;

    let repositories = init_repositories(&settings).await?;

    let storage = Arc::new(
        ImageStorage::new(settings.storage.media_dir.clone()).map_err(InfraError::Io)?,
    );

    let cache_config = CacheConfig::from(&settings.cache);
    let field_cache = cache::build_field_cache(&cache_config);

    let images = Arc::new(ImageService::new(
        repositories,
        field_cache,
        cache_config,
        Arc::clone(&storage),
        Arc::new(renderer),
        settings.server.public_base_url.clone(),
    ));

    let router = build_router(ApiState { images, storage });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

/// Every configured tool must respond to `--version` before we accept
/// traffic; a broken toolchain is a deployment problem, not a request one.
fn check_toolchain(renderer: &Renderer) -> Result<(), AppError> {
    let failures = renderer.toolchain().doctor();
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        error!(error = %failure, "toolchain check failed");
    }
    Err(InfraError::configuration(format!(
        "{} toolchain check(s) failed; see log for details",
        failures.len()
    ))
    .into())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;

    let repositories = Arc::new(PostgresRepositories::new(pool));
    repositories
        .run_migrations()
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(repositories)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install shutdown signal handler");
    }
}
