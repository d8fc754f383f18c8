//! Gateway service lifecycle.
//!
//! Start order: validate config, connect (fatal on failure), bind the
//! control-plane listener, start the session loop. Stop order on signal:
//! stop accepting, drain in-flight requests for the grace period, stop the
//! session loop, which closes the session.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::core::error::{GatewayError, Result};
use crate::core::traits::EndpointConnector;
use crate::gateway::api::GatewayApi;
use crate::gateway::config::GatewayConfig;
use crate::gateway::registry::service_descriptor;
use crate::gateway::server;
use crate::gateway::session::ConnectionSession;

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
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
                tracing::error!("failed to listen for SIGTERM: {}", e);
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
    tracing::info!("received shutdown signal");
}

/// Run the gateway until the process is signalled.
pub async fn run(config: GatewayConfig, connector: Arc<dyn EndpointConnector>) -> Result<()> {
    run_until(config, connector, shutdown_signal()).await
}

/// Run the gateway until `shutdown` resolves.
pub async fn run_until<F>(
    config: GatewayConfig,
    connector: Arc<dyn EndpointConnector>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    let addr = format!("{}:{}", config.host, config.port());
    let grace = config.timeouts.shutdown_grace();
    let descriptor = service_descriptor(&config.connection);

    let session = Arc::new(ConnectionSession::new(config, connector));
    session.connect().await?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Io(format!("cannot bind {}: {}", addr, e)))?;
    tracing::info!(connection = %session.name(), "{} listening on {}", descriptor, addr);

    let (stop_tx, stop_rx) = watch::channel(false);
    let session_loop = {
        let session = session.clone();
        tokio::spawn(async move { session.run(stop_rx).await })
    };

    // Stop accepting when the signal arrives, then bound the drain.
    let (signalled_tx, mut signalled_rx) = watch::channel(false);
    let api = Arc::new(GatewayApi::new(session.clone()));
    let mut http = tokio::spawn(server::serve(api, listener, async move {
        shutdown.await;
        let _ = signalled_tx.send(true);
    }));

    let served = tokio::select! {
        res = &mut http => Some(res),
        _ = signalled_rx.wait_for(|s| *s) => None,
    };
    let served = match served {
        Some(res) => res,
        None => match tokio::time::timeout(grace, &mut http).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(
                    connection = %session.name(),
                    "in-flight requests still running after {:?}, closing listener",
                    grace
                );
                http.abort();
                Ok(Ok(()))
            }
        },
    };

    let _ = stop_tx.send(true);
    if let Err(e) = session_loop.await {
        tracing::error!(connection = %session.name(), "session loop panicked: {}", e);
    }
    tracing::info!(connection = %session.name(), "{} stopped", descriptor);

    served.map_err(|e| GatewayError::Io(format!("control plane task failed: {}", e)))?
}
