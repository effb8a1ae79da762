//! HTTP surface over the proxy core.

mod error;
mod handlers;
mod router;
mod server;

pub use error::ApiError;
pub use router::build_router;
pub use server::{AppState, GatewayServer};
