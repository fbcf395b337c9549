//! HTTP server module.
//!
//! Serves the router over plain HTTP (TLS is terminated in front of the
//! container) and drains connections gracefully on SIGTERM/SIGINT.

mod probe;
mod server;
mod shutdown;

pub use probe::{probe, ProbeError};
pub use server::{start_server, ServerError};
