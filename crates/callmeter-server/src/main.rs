//! callmeter server
//!
//! - Loads `CALLMETER_CONFIG` (default `callmeter.yaml`)
//! - Serves `/metrics`, `/healthz`, `/readyz`, `/info`
//! - Flips readiness to draining on shutdown signal

use tracing_subscriber::{fmt, EnvFilter};

use callmeter_core::error::Result;
use callmeter_server::{app_state::AppState, config, router};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(code = e.code().as_str(), error = %e, "callmeter-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.server.listen_addr()?;

    let state = AppState::from_config(&cfg, std::process::id())?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, "callmeter-server starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| callmeter_core::MetricsError::Internal(format!("bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .map_err(|e| callmeter_core::MetricsError::Internal(format!("server failed: {e}")))
}

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    state.set_draining();
    tracing::info!("signal received, draining");
}
