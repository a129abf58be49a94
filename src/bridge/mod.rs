//! Stdio bridge to the supervised child process.
//!
//! The child speaks newline-delimited JSON on stdin/stdout. This module owns
//! the whole path between an inbound request and its correlated response:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing
//!   for the child's output streams.
//! - `message`: correlation identifiers and line decoding.
//! - `correlator`: keyed table of pending requests with per-request timers.
//! - `reader` / `writer`: async tasks on the child's stdout/stderr and stdin.
//! - `spawner`: process spawning, exit monitoring and termination.
//! - `supervisor`: lifecycle, readiness and the `submit` entry point.

pub mod codec;
pub mod correlator;
pub mod message;
pub mod reader;
pub mod spawner;
pub mod supervisor;
pub mod writer;

pub use message::MessageId;
pub use supervisor::{Supervisor, SupervisorConfig};
