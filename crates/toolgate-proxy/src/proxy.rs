use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use toolgate_mcp::{
    BackendStatus, CallError, LaunchSpec, ManagerError, NativeTool, SessionManager,
};
use toolgate_registry::{RegistryError, ToolFilter, ToolRegistry};

use crate::error::ProxyError;
use crate::ingest::descriptor_from_native;

/// Backends connecting in parallel during bootstrap.
const MAX_CONCURRENT_CONNECTS: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub status: BackendStatus,
    pub tool_count: usize,
}

/// Glue with state: drives the session manager and keeps the registry in
/// sync with what the backends expose. Holds references only; the registry
/// owns descriptors and the manager owns sessions.
pub struct Proxy {
    manager: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy").finish_non_exhaustive()
    }
}

impl Proxy {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, registry: Arc<ToolRegistry>) -> Self {
        Self { manager, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Connect every configured backend in parallel and index its tools.
    /// A backend that fails to connect or enumerate is logged and skipped;
    /// the healthy set proceeds. Returns the number of indexed tools.
    pub async fn bootstrap(&self, servers: HashMap<String, LaunchSpec>) -> usize {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTS));
        let mut join_set = JoinSet::new();

        for (name, spec) in servers {
            let manager = Arc::clone(&self.manager);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let tools = match manager.connect(&name, spec).await {
                    Ok(()) => match manager.list_tools(&name).await {
                        Ok(tools) => tools,
                        Err(e) => {
                            tracing::warn!(backend = name, "tool enumeration failed: {e}");
                            Vec::new()
                        }
                    },
                    Err(e) => {
                        tracing::warn!(backend = name, "connect failed: {e}");
                        Vec::new()
                    }
                };
                (name, tools)
            });
        }

        let mut indexed = 0;
        while let Some(joined) = join_set.join_next().await {
            let Ok((name, tools)) = joined else {
                tracing::warn!("backend connect task panicked");
                continue;
            };
            let count = self.index_tools(&name, &tools);
            if count > 0 {
                tracing::info!(backend = name, tools = count, "backend indexed");
            }
            indexed += count;
        }
        indexed
    }

    /// Connect one backend at runtime and index its tools. When `trusted`
    /// descriptors are supplied they are inserted directly and live
    /// enumeration is skipped. Returns the registered tool ids.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, `ServerExists`, or the connect error.
    pub async fn add_server(
        &self,
        name: &str,
        spec: LaunchSpec,
        trusted: Option<Vec<NativeTool>>,
    ) -> Result<Vec<String>, ProxyError> {
        if !valid_name(name) {
            return Err(ProxyError::InvalidName { name: name.into() });
        }
        if self.manager.contains(name).await {
            return Err(ProxyError::ServerExists { name: name.into() });
        }

        let tools = match trusted {
            // Trusted descriptors are indexed even if the backend is not up
            // yet; the record stays failed and reconnectable.
            Some(tools) => {
                if let Err(e) = self.manager.connect(name, spec).await {
                    tracing::warn!(backend = name, "trusted registration, connect failed: {e}");
                }
                tools
            }
            None => {
                self.manager.connect(name, spec).await?;
                match self.manager.list_tools(name).await {
                    Ok(tools) => tools,
                    Err(e) => {
                        self.manager.disconnect(name).await;
                        return Err(map_manager_error(name, e));
                    }
                }
            }
        };

        self.index_tools(name, &tools);
        Ok(self
            .registry
            .list(&ToolFilter {
                backend: Some(name.into()),
                ..Default::default()
            })
            .iter()
            .map(|t| t.id.clone())
            .collect())
    }

    /// Disconnect the backend and drop every tool it owns.
    pub async fn remove_server(&self, name: &str) -> usize {
        self.manager.disconnect(name).await;
        let removed = self.registry.delete_by_backend(name);
        tracing::info!(backend = name, tools = removed, "server removed");
        removed
    }

    /// Resolve a flat tool id and forward the call to the owning backend.
    /// After a lost session one reconnect is attempted transparently.
    ///
    /// # Errors
    ///
    /// `UnknownTool` resolves without touching any backend; call errors are
    /// surfaced verbatim.
    pub async fn execute(
        &self,
        tool_id: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ProxyError> {
        let tool = self
            .registry
            .get(tool_id)
            .map_err(|_: RegistryError| ProxyError::UnknownTool { id: tool_id.into() })?;
        let backend = tool
            .backend
            .clone()
            .ok_or_else(|| ProxyError::NotRoutable { id: tool_id.into() })?;

        match self.manager.call_tool(&backend, &tool.name, args.clone()).await {
            Ok(result) => Ok(result),
            Err(ManagerError::Call(CallError::SessionLost { .. })) => {
                tracing::warn!(backend, tool = tool.name, "session lost, reconnecting once");
                self.manager
                    .reconnect(&backend)
                    .await
                    .map_err(|_| ProxyError::BackendUnavailable {
                        backend: backend.clone(),
                    })?;
                self.manager
                    .call_tool(&backend, &tool.name, args)
                    .await
                    .map_err(|e| map_manager_error(&backend, e))
            }
            Err(e) => Err(map_manager_error(&backend, e)),
        }
    }

    /// Connected and failed backends with their indexed tool counts.
    pub async fn servers(&self) -> Vec<ServerInfo> {
        self.manager
            .statuses()
            .await
            .into_iter()
            .map(|(name, status)| {
                let tool_count = self
                    .registry
                    .list(&ToolFilter {
                        backend: Some(name.clone()),
                        ..Default::default()
                    })
                    .len();
                ServerInfo {
                    name,
                    status,
                    tool_count,
                }
            })
            .collect()
    }

    /// Graceful teardown of every session.
    pub async fn shutdown(&self) {
        self.manager.shutdown_all().await;
    }

    /// Insert descriptors, skipping duplicates (first registration wins).
    fn index_tools(&self, backend: &str, tools: &[NativeTool]) -> usize {
        let mut indexed = 0;
        for native in tools {
            let spec = descriptor_from_native(backend, native);
            let id = spec.id.clone();
            match self.registry.insert(spec) {
                Ok(()) => indexed += 1,
                Err(RegistryError::DuplicateId { .. }) => {
                    tracing::warn!(backend, id, "duplicate tool id, keeping first registration");
                }
                Err(e) => {
                    tracing::warn!(backend, id, "failed to index tool: {e}");
                }
            }
        }
        indexed
    }
}

fn map_manager_error(backend: &str, error: ManagerError) -> ProxyError {
    match error {
        ManagerError::NotConnected { .. } => ProxyError::BackendUnavailable {
            backend: backend.into(),
        },
        ManagerError::Connect(e) => e.into(),
        ManagerError::Call(e) => e.into(),
    }
}

/// Backend names share the tool id grammar; `_` is the reserved separator.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
