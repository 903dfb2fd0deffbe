//! Agent reader task.
//!
//! Reads one of the child's output pipes through [`FramedRead`] backed by
//! [`AgentCodec`] and forwards every framed line as an
//! [`AgentEvent::Output`] through a tokio [`mpsc`] channel.
//!
//! Stdout and stderr each get their own reader and therefore their own
//! accumulation buffer. Stderr lines are additionally logged at `WARN`.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::codec::{AgentCodec, Line};
use crate::agent::{AgentEvent, StreamKind};
use crate::Result;

/// Reader task: frame `source` into lines and emit them on `event_tx`.
///
/// Returns on EOF, on an I/O error (logged), when `event_tx` closes, or when
/// `cancel` fires. The caller decides what EOF means; this task emits no
/// termination event.
///
/// # Errors
///
/// Returns `Ok(())` in every terminal case; the `Result` is kept so the
/// task can be joined uniformly with the writer.
pub async fn run_reader<R>(
    session_id: u64,
    stream: StreamKind,
    source: R,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, AgentCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, ?stream, "agent reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, ?stream, "agent reader: EOF detected");
                        break;
                    }

                    Some(Err(err)) => {
                        warn!(
                            session_id,
                            ?stream,
                            error = %err,
                            "agent reader: IO error, stopping"
                        );
                        break;
                    }

                    Some(Ok(line)) => {
                        if stream == StreamKind::Stderr {
                            log_stderr(session_id, &line);
                        }
                        let event = AgentEvent::Output { stream, line };
                        if event_tx.send(event).await.is_err() {
                            debug!(session_id, ?stream, "agent reader: event_tx closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn log_stderr(session_id: u64, line: &Line) {
    match line {
        Line::Raw(text) => warn!(session_id, stderr = %text, "agent stderr"),
        Line::Structured(value) => warn!(session_id, stderr = %value, "agent stderr"),
    }
}
