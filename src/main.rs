mod config;
mod error;
mod fingerprint;
mod handlers;
mod store;
mod workers;

use std::process::ExitCode;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::http::HeaderValue;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::routing::{delete, post};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_appender::non_blocking::WorkerGuard;

use config::Config;
use handlers::surface;
use store::{Store, StoreError};

const MAX_BODY_SIZE: usize = 2 * 1024 * 1024 * 1024; // 2GB

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Config,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/products", post(handlers::products::update_products))
        .route("/reset", delete(handlers::reset::reset))
        .fallback(surface::fallback)
        .method_not_allowed_fallback(surface::fallback)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(middleware::map_response(surface::payload_too_large_as_json))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn init_tracing(config: &Config) -> WorkerGuard {
    let log_level = if config.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("products_receiver={log_level},tower_http=info").into()
    });
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("products receiver failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "products receiver failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    tracing::info!(
        host = %gethostname::gethostname().to_string_lossy(),
        environment = ?config.environment,
        scheme = %config.fingerprint_scheme,
        "products receiver initialising"
    );

    let store = Store::connect(&config).await?;
    store::bootstrap::ensure_schema(&store).await?;
    tracing::info!(backend = store.backend_name(), "store ready");

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Store::Memory(memory) = &store {
        workers::expiry_sweep::spawn_expiry_sweeper(
            memory.clone(),
            workers::expiry_sweep::EXPIRY_SWEEP_INTERVAL,
            shutdown_rx.clone(),
        );
    }

    let state = AppState {
        store: store.clone(),
        config: config.clone(),
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    tracing::info!(port = config.port, "products receiver starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(StartupError::Serve)?;

    store.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests...");

    // Notify workers to exit
    let _ = shutdown_tx.send(true);
}
