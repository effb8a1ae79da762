mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use toolgate_embed::HashEmbedder;
use toolgate_gateway::GatewayServer;
use toolgate_mcp::{SessionConfig, SessionManager};
use toolgate_proxy::Proxy;
use toolgate_registry::{GatingPolicy, ToolRegistry};

use crate::settings::{Settings, load_servers};

const EXIT_CONFIG: u8 = 1;
const EXIT_EMBEDDER: u8 = 2;
const EXIT_IO: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let servers = match load_servers(&settings.servers_path) {
        Ok(servers) => servers,
        Err(e) => {
            tracing::error!("server config error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let embedder = match HashEmbedder::new(settings.embedding_dim) {
        Ok(embedder) => embedder,
        Err(e) => {
            tracing::error!("embedder init failed: {e}");
            return ExitCode::from(EXIT_EMBEDDER);
        }
    };

    let registry = Arc::new(ToolRegistry::new(Arc::new(embedder)));
    let manager = Arc::new(SessionManager::new(SessionConfig {
        handshake_timeout: settings.handshake_timeout,
        call_timeout: settings.call_timeout,
        close_grace: settings.close_grace,
    }));
    let proxy = Arc::new(Proxy::new(manager, registry));

    tracing::info!(backends = servers.len(), "connecting to MCP servers");
    let indexed = proxy.bootstrap(servers).await;
    tracing::info!(tools = indexed, "backend tools indexed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let gating = GatingPolicy {
        max_tools: settings.max_tools,
        max_tokens: settings.max_tokens,
    };
    let server = GatewayServer::new(
        &settings.host,
        settings.port,
        Arc::clone(&proxy),
        gating,
        shutdown_rx,
    );
    let served = server.serve().await;

    if tokio::time::timeout(settings.shutdown_timeout, proxy.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("session teardown exceeded the shutdown deadline");
    }

    match served {
        Ok(()) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("gateway failed: {e}");
            ExitCode::from(EXIT_IO)
        }
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
