//! HTTP front-end.
//!
//! A thin axum router in front of the [`Supervisor`](crate::bridge::Supervisor):
//! each `POST /rpc` body is one JSON message forwarded to the child, and the
//! correlated response (or a structured error) becomes the HTTP response.

pub mod error;
pub mod server;

pub use server::{bind, router, serve_http, HttpState};
