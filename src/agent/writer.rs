//! Agent writer task.
//!
//! Receives outbound JSON values from a tokio [`mpsc`] channel, serialises
//! each to a single-line JSON string, and writes it to the agent's stdin
//! terminated by `\n`.
//!
//! Writes are not flow-controlled against the agent: turns are line-sized.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task: serialise values from `msg_rx` onto `stdin` as NDJSON.
///
/// Exits cleanly when `cancel` fires or every sender is dropped. Dropping
/// the receiver on exit is what marks the process as no longer writable.
///
/// # Errors
///
/// - [`AppError::Launch`]`("failed to serialise outbound message: …")`.
/// - [`AppError::Io`]`("write failed: …")` if the agent closed its stdin.
pub async fn run_writer<W>(
    session_id: u64,
    mut stdin: W,
    mut msg_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "agent writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(session_id, "agent writer: message channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Launch(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                let written = async {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                };
                written.await.map_err(|e| {
                    warn!(session_id, error = %e, "agent writer: write to stdin failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
                debug!(session_id, bytes = bytes.len(), "agent writer: turn written");
            }
        }
    }

    Ok(())
}
