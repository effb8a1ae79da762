//! MCP client sessions over child-process stdio: connect, enumerate,
//! correlate, execute.

pub mod codec;
pub mod error;
pub mod manager;
pub mod session;

pub use codec::NativeTool;
pub use error::{CallError, ConnectError, ManagerError};
pub use manager::{BackendStatus, LaunchSpec, SessionManager};
pub use session::{Session, SessionConfig};
