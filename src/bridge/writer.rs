//! Child stdin writer task.
//!
//! Receives outbound JSON messages from an unbounded [`mpsc`] channel,
//! serialises each to one compact line, and writes it to the child's stdin.
//! The channel preserves submission order, so requests reach the child in the
//! order [`Supervisor::submit`](crate::bridge::supervisor::Supervisor::submit)
//! was called.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task: serialises outbound messages as NDJSON into `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (child retired), or
/// - `msg_rx` is closed (all senders dropped).
///
/// # Errors
///
/// - [`AppError::Internal`] if serialisation fails (does not occur for `Value`).
/// - [`AppError::Io`]`("write failed: …")` if the child's stdin is closed.
pub async fn run_writer<W>(
    pid: Option<u32>,
    stdin: W,
    mut msg_rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(?pid, "child writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(?pid, "child writer: message channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Internal(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                write_line(&mut stdin, &bytes).await.map_err(|e| {
                    warn!(?pid, error = %e, "child writer: write to stdin failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}

async fn write_line<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
