use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    add_server, clear_tools, discover_tools, execute_tool, health, list_servers, provision_tools,
    register_server_trusted, register_tool, remove_server,
};
use crate::server::AppState;

#[must_use]
pub fn build_router(state: AppState, max_body_size: usize) -> Router {
    let api = Router::new()
        .route("/api/tools/discover", post(discover_tools))
        .route("/api/tools/provision", post(provision_tools))
        .route("/api/tools/register", post(register_tool))
        .route("/api/tools/clear", delete(clear_tools))
        .route("/api/proxy/execute", post(execute_tool))
        .route("/api/mcp/add_server", post(add_server))
        .route("/api/mcp/ai/register-server", post(register_server_trusted))
        .route("/api/mcp/servers", get(list_servers))
        .route("/api/mcp/servers/{name}", delete(remove_server))
        .layer(RequestBodyLimitLayer::new(max_body_size));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
