use toolgate_mcp::{CallError, ConnectError};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("tool '{id}' not found")]
    UnknownTool { id: String },

    #[error("tool '{id}' has no owning backend")]
    NotRoutable { id: String },

    #[error("backend '{backend}' is unavailable")]
    BackendUnavailable { backend: String },

    #[error("invalid server name '{name}': expected [A-Za-z0-9-]+")]
    InvalidName { name: String },

    #[error("server '{name}' is already registered")]
    ServerExists { name: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Call(#[from] CallError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_display() {
        let err = ProxyError::UnknownTool {
            id: "missing_tool".into(),
        };
        assert_eq!(err.to_string(), "tool 'missing_tool' not found");
    }

    #[test]
    fn invalid_name_display() {
        let err = ProxyError::InvalidName {
            name: "bad_name".into(),
        };
        assert!(err.to_string().contains("bad_name"));
        assert!(err.to_string().contains("[A-Za-z0-9-]+"));
    }

    #[test]
    fn call_error_passes_through_verbatim() {
        let err: ProxyError = CallError::SessionLost {
            backend: "exa".into(),
        }
        .into();
        assert_eq!(err.to_string(), "session with backend 'exa' was lost");
    }
}
