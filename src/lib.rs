#![forbid(unsafe_code)]

//! `mcp-relay` exposes a stdio JSON-RPC child process over HTTP.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod http;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
