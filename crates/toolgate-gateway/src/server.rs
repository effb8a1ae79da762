use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use toolgate_proxy::Proxy;
use toolgate_registry::{DiscoveryEngine, GatingPolicy};

use crate::router::build_router;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub discovery: Arc<DiscoveryEngine>,
    pub gating: GatingPolicy,
    pub started_at: Instant,
}

pub struct GatewayServer {
    addr: SocketAddr,
    max_body_size: usize,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(
        bind: &str,
        port: u16,
        proxy: Arc<Proxy>,
        gating: GatingPolicy,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        let discovery = Arc::new(DiscoveryEngine::new(Arc::clone(proxy.registry())));
        Self {
            addr,
            max_body_size: 1_048_576,
            state: AppState {
                proxy,
                discovery,
                gating,
                started_at: Instant::now(),
            },
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Serve until the shutdown channel flips to true.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server hits a
    /// fatal I/O error.
    pub async fn serve(self) -> std::io::Result<()> {
        let router = build_router(self.state, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("gateway listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                tracing::info!("gateway shutting down");
            })
            .await
    }
}
