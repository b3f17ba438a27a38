use std::net::SocketAddr;
use std::time::Duration;

use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use viewport_cache::config::Config;
use viewport_cache::supervisor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
const COMPRESSION_MIN_BYTES: u16 = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("viewport_cache=info".parse()?),
        )
        .init();

    info!("starting viewport-cache backend");

    let config = Config::from_env()?;
    let (state, precomputer) = supervisor::build_state(&config).await?;
    info!(point_count = state.point_count, "dataset loaded");

    supervisor::spawn_background_jobs(&config, precomputer);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = viewport_cache::router(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(COMPRESSION_MIN_BYTES)))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests (grace period {:?})", SHUTDOWN_GRACE_PERIOD);
}
