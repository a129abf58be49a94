//! Child output reader tasks.
//!
//! [`run_reader`] frames the child's stdout with [`LineCodec`], decodes each
//! line with [`decode_line`] and hands the result to a callback. The callback
//! sees every line, decodable or not, because any output at all is evidence
//! the child is alive. [`run_stderr_logger`] frames stderr the same way and
//! only logs it.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::codec::LineCodec;
use crate::bridge::message::decode_line;

/// Stdout reader task.
///
/// Calls `on_output` once per framed line with the decoded message, or
/// `None` when the line was blank or not JSON (already logged by
/// [`decode_line`]).
///
/// Returns on EOF, on an unrecoverable read error, or when `cancel` fires.
/// Stream closure is only logged; process exit is detected separately by the
/// exit monitor.
pub async fn run_reader<R, F>(
    pid: Option<u32>,
    stdout: R,
    cancel: CancellationToken,
    mut on_output: F,
)
where
    R: AsyncRead + Unpin + Send,
    F: FnMut(Option<Value>) + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(?pid, "child reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(?pid, "child reader: stdout closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(?pid, error = %e, "child reader: read error, stopping");
                        break;
                    }
                    Some(Ok(line)) => on_output(decode_line(&line)),
                }
            }
        }
    }
}

/// Stderr logging task. Each line is logged at `INFO`; nothing is parsed.
pub async fn run_stderr_logger<R>(pid: Option<u32>, stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => {
                match item {
                    None => break,
                    Some(Err(e)) => {
                        warn!(?pid, error = %e, "child stderr: read error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if !line.trim().is_empty() {
                            info!(?pid, line = %line, "child stderr");
                        }
                    }
                }
            }
        }
    }
}
