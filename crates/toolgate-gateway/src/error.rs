use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use toolgate_mcp::CallError;
use toolgate_proxy::ProxyError;
use toolgate_registry::RegistryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Registry(e) => match e {
                RegistryError::DuplicateId { .. } => StatusCode::CONFLICT,
                RegistryError::UnknownTool { .. } => StatusCode::NOT_FOUND,
                RegistryError::Embed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Proxy(e) => match e {
                ProxyError::UnknownTool { .. } => StatusCode::NOT_FOUND,
                ProxyError::InvalidName { .. } => StatusCode::BAD_REQUEST,
                ProxyError::ServerExists { .. } => StatusCode::CONFLICT,
                ProxyError::Call(CallError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
                ProxyError::NotRoutable { .. }
                | ProxyError::BackendUnavailable { .. }
                | ProxyError::Connect(_)
                | ProxyError::Call(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "request failed: {self}");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
            code: status.as_u16(),
        });
        (status, body).into_response()
    }
}
