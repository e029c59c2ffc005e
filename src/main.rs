use anyhow::{Context, Result};
use rental_edge_gateway::{routes, AppState, GatewayConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().context("Failed to load configuration")?;

    init_tracing(&config.log_level);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {:#}", e);
        return Err(e);
    }

    info!(
        upstream = %config.upstream_url,
        allowed_origins = ?config.allowed_origins,
        anonymous_quota = config.rate_limit.anonymous_quota,
        authenticated_quota = config.rate_limit.authenticated_quota,
        window_secs = config.rate_limit.window_secs,
        "Configuration loaded"
    );

    let addr = config.listen_addr()?;
    let state = AppState::new(config.clone()).context("Failed to build gateway state")?;

    let sweeper = config
        .rate_limit
        .sweep_interval()
        .map(|every| state.limiter.spawn_sweeper(every));

    let (bound, server) =
        match warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
            Ok(bound) => bound,
            Err(e) => {
                error!(%addr, error = %e, "Failed to bind listener");
                return Err(e).context("Failed to bind listener");
            }
        };

    info!("API gateway listening on http://{}", bound);
    server.await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("API gateway stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_line_number(true)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
