//! Server module
//!
//! HTTP router, handlers and lifecycle.

pub mod http;
pub mod startup;

pub use http::{create_router, ApiResponse, AppState, HttpConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
