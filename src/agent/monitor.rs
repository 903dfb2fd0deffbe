//! Exit monitor for agent processes.
//!
//! Owns the [`Child`] after launch. Waits for the process to exit (or kills
//! it when `shutdown` fires), lets the pipe readers drain, and then emits a
//! single [`AgentEvent::Exited`], so the close notification always follows
//! the last line of output.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentEvent;
use crate::Result;

/// How long readers may keep draining after the process has exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawn the monitor task for one agent process.
///
/// * `readers`: reader tasks for stdout and stderr, joined before exit is reported.
/// * `drain`: cancels the readers if they outlive [`DRAIN_TIMEOUT`]
///   (a grandchild may still hold the pipes).
/// * `shutdown`: fired by the supervisor to kill the process; fired by the
///   monitor itself once the process is gone so the writer stops.
#[must_use]
pub fn monitor_exit(
    session_id: u64,
    mut child: Child,
    readers: Vec<JoinHandle<Result<()>>>,
    event_tx: mpsc::Sender<AgentEvent>,
    drain: CancellationToken,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (result, killed) = tokio::select! {
            result = child.wait() => (result, false),
            () = shutdown.cancelled() => {
                info!(session_id, "monitor: kill requested");
                if let Err(err) = child.start_kill() {
                    warn!(session_id, %err, "failed to signal agent process");
                }
                (child.wait().await, true)
            }
        };
        shutdown.cancel();

        let (code, reason) = match result {
            Ok(status) => {
                let code = status.code();
                let reason = match (killed, code) {
                    (true, _) => "process killed".to_owned(),
                    (false, Some(c)) => format!("process exited with code {c}"),
                    (false, None) => "process terminated by signal".to_owned(),
                };
                (code, reason)
            }
            Err(err) => {
                warn!(session_id, %err, "error waiting for agent child process");
                (None, format!("wait error: {err}"))
            }
        };

        join_readers(session_id, readers, &drain).await;

        info!(session_id, ?code, %reason, "agent process exited");
        if event_tx
            .send(AgentEvent::Exited { code, reason })
            .await
            .is_err()
        {
            warn!(session_id, "event_tx closed before Exited could be delivered");
        }
    })
}

/// Wait for every reader to reach EOF, cancelling them after [`DRAIN_TIMEOUT`].
async fn join_readers(
    session_id: u64,
    mut readers: Vec<JoinHandle<Result<()>>>,
    drain: &CancellationToken,
) {
    let all = async {
        while let Some(reader) = readers.first_mut() {
            if let Err(err) = reader.await {
                warn!(session_id, %err, "agent reader task failed");
            }
            readers.remove(0);
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, all).await.is_err() {
        warn!(session_id, "agent pipes still open after exit, cancelling readers");
        drain.cancel();
        for reader in readers {
            let _ = reader.await;
        }
    }
}
