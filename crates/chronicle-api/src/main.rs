//! Chronicle API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use chronicle_api::config::AppConfig;
use chronicle_api::error::AppError;
use chronicle_api::state::AppState;
use chronicle_api::telemetry;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_store::schema::ensure_schema;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let telemetry = telemetry::init()?;

    tracing::info!("Starting Chronicle API server");

    let config = AppConfig::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    let app_state = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            ensure_schema(&pool).await?;
            tracing::info!("Using PostgreSQL event store");
            AppState::postgres(pool, &config, clock, shutdown.clone())?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory event store");
            AppState::in_memory(&config, clock, shutdown.clone())?
        }
    };

    let feeder = app_state.spawn_read_model_feeder();

    let app = chronicle_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(feeder) = feeder
        && let Err(err) = feeder.await
    {
        tracing::error!(error = %err, "read model feeder panicked");
    }

    tracing::info!("Server stopped");
    telemetry.shutdown();
    Ok(())
}

/// Waits for Ctrl-C, then cancels in-flight requests.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
