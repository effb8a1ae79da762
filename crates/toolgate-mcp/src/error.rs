use crate::codec::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to spawn backend '{backend}': {source}")]
    Spawn {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with backend '{backend}' timed out after {timeout_ms}ms")]
    HandshakeTimeout { backend: String, timeout_ms: u64 },

    #[error("handshake with backend '{backend}' failed: {message}")]
    Protocol { backend: String, message: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("call '{tool}' on backend '{backend}' timed out after {timeout_ms}ms")]
    Timeout {
        backend: String,
        tool: String,
        timeout_ms: u64,
    },

    #[error("session with backend '{backend}' was lost")]
    SessionLost { backend: String },

    #[error("backend '{backend}' rejected '{tool}': {error}")]
    Backend {
        backend: String,
        tool: String,
        error: RpcError,
    },

    #[error("call '{tool}' on backend '{backend}' was cancelled")]
    Cancelled { backend: String, tool: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("backend '{backend}' is not connected")]
    NotConnected { backend: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Call(#[from] CallError),
}
