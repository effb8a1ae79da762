use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::codec::NativeTool;
use crate::error::{CallError, ConnectError, ManagerError};
use crate::session::{Session, SessionConfig};

/// How to start a backend MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Pending,
    Connecting,
    Connected,
    Failed,
    Closed,
}

struct BackendRecord {
    spec: LaunchSpec,
    status: BackendStatus,
    session: Option<Arc<Session>>,
}

/// Owns every backend session and routes requests by backend name.
pub struct SessionManager {
    config: SessionConfig,
    backends: RwLock<HashMap<String, BackendRecord>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            backends: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Spawn the backend and perform the handshake. Idempotent: a second
    /// connect on a healthy entry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectError`; the record is kept with status `Failed` so
    /// the backend stays visible and can be reconnected.
    pub async fn connect(&self, name: &str, spec: LaunchSpec) -> Result<(), ConnectError> {
        {
            let mut backends = self.backends.write().await;
            if let Some(record) = backends.get(name)
                && let Some(session) = &record.session
                && session.is_healthy()
            {
                return Ok(());
            }
            backends.insert(
                name.to_owned(),
                BackendRecord {
                    spec: spec.clone(),
                    status: BackendStatus::Connecting,
                    session: None,
                },
            );
        }

        match Session::connect(name, &spec, self.config).await {
            Ok(session) => {
                let mut backends = self.backends.write().await;
                if let Some(record) = backends.get_mut(name) {
                    record.status = BackendStatus::Connected;
                    record.session = Some(Arc::new(session));
                } else {
                    // Removed while we were connecting.
                    session.close(self.config.close_grace).await;
                }
                Ok(())
            }
            Err(e) => {
                let mut backends = self.backends.write().await;
                if let Some(record) = backends.get_mut(name) {
                    record.status = BackendStatus::Failed;
                }
                Err(e)
            }
        }
    }

    /// Replace a failed session with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` for an unknown backend, or the connect error.
    pub async fn reconnect(&self, name: &str) -> Result<(), ManagerError> {
        let (spec, old) = {
            let mut backends = self.backends.write().await;
            let record = backends.get_mut(name).ok_or(ManagerError::NotConnected {
                backend: name.into(),
            })?;
            record.status = BackendStatus::Connecting;
            (record.spec.clone(), record.session.take())
        };
        if let Some(session) = old {
            session.close(Duration::ZERO).await;
        }
        tracing::info!(backend = name, "reconnecting");
        self.connect(name, spec).await.map_err(Into::into)
    }

    /// # Errors
    ///
    /// Returns `NotConnected` or the underlying `CallError`.
    pub async fn list_tools(&self, name: &str) -> Result<Vec<NativeTool>, ManagerError> {
        let session = self.session(name).await?;
        session.list_tools().await.map_err(|e| self.observe(name, e))
    }

    /// Forward a tool call to the owning backend's session.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or the underlying `CallError` verbatim.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ManagerError> {
        let session = self.session(name).await?;
        session
            .call_tool(tool, args, self.config.call_timeout)
            .await
            .map_err(|e| self.observe(name, e))
    }

    /// Close the session and forget the backend. Idempotent.
    pub async fn disconnect(&self, name: &str) {
        let record = self.backends.write().await.remove(name);
        if let Some(record) = record
            && let Some(session) = record.session
        {
            tracing::info!(backend = name, "disconnecting");
            session.close(self.config.close_grace).await;
        }
    }

    /// Disconnect every backend in parallel, bounded by the close grace.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, BackendRecord)> =
            self.backends.write().await.drain().collect();
        let grace = self.config.close_grace;

        let mut join_set = JoinSet::new();
        for (name, record) in drained {
            if let Some(session) = record.session {
                join_set.spawn(async move {
                    tracing::info!(backend = name, "shutting down session");
                    session.close(grace).await;
                });
            }
        }
        while join_set.join_next().await.is_some() {}
    }

    /// Backend names with their current status, sorted by name.
    pub async fn statuses(&self) -> Vec<(String, BackendStatus)> {
        let backends = self.backends.read().await;
        let mut out: Vec<(String, BackendStatus)> = backends
            .iter()
            .map(|(name, record)| {
                let status = match (&record.session, record.status) {
                    (Some(session), BackendStatus::Connected) if !session.is_healthy() => {
                        BackendStatus::Failed
                    }
                    (_, status) => status,
                };
                (name.clone(), status)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[must_use]
    pub async fn contains(&self, name: &str) -> bool {
        self.backends.read().await.contains_key(name)
    }

    async fn session(&self, name: &str) -> Result<Arc<Session>, ManagerError> {
        let backends = self.backends.read().await;
        backends
            .get(name)
            .and_then(|r| r.session.clone())
            .ok_or(ManagerError::NotConnected {
                backend: name.into(),
            })
    }

    /// A lost session marks the record failed; the proxy may reconnect.
    fn observe(&self, name: &str, error: CallError) -> ManagerError {
        if matches!(error, CallError::SessionLost { .. }) {
            if let Ok(mut backends) = self.backends.try_write()
                && let Some(record) = backends.get_mut(name)
            {
                record.status = BackendStatus::Failed;
            }
            tracing::warn!(backend = name, "session lost");
        }
        error.into()
    }
}
