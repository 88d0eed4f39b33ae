//! webhook-forge library
//!
//! Hook registry with JSON persistence, token-checked triggers that write
//! flag files, and the HTTP server exposing both.

pub mod cli;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod server;
