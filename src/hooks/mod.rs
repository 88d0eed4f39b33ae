//! Hook management
//!
//! - `model` - the hook record
//! - `registry` - persistent JSON-backed store
//! - `service` - validation, token checks and flag-file writes
//! - `auth` - token extraction and comparison
//! - `token` - secret token generation

pub mod auth;
pub mod error;
pub mod model;
pub mod registry;
pub mod service;
pub mod token;

pub use auth::{extract_bearer_token, extract_trigger_token, timing_safe_equal, validate_token};
pub use error::HookError;
pub use model::Hook;
pub use registry::HookRegistry;
pub use service::{validate_flag_path, validate_hook, FlagWrite, HookService};
pub use token::generate_token;
