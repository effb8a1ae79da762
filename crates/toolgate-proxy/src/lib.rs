//! Composes the session manager and tool registry into one cross-backend
//! surface with namespaced tool ids.

pub mod error;
pub mod ingest;
pub mod proxy;

pub use error::ProxyError;
pub use ingest::descriptor_from_native;
pub use proxy::{Proxy, ServerInfo};
