use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Longest quiet period honoured; larger delays are clamped to it.
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(3600);

/// Collapse bursts of changed paths into batches.
///
/// Every received path restarts the timer. When it fires, the paths
/// gathered since the last batch are sent once and cleared. Ends when
/// the input closes, the output is dropped, or `cancel` fires.
pub async fn debounce(
    mut rx: mpsc::Receiver<PathBuf>,
    delay: Duration,
    cancel: CancellationToken,
    out: mpsc::Sender<BTreeSet<PathBuf>>,
) {
    let delay = delay.min(MAX_DEBOUNCE);
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => {
                let Some(path) = received else { break };
                trace!(path = %path.display(), "change queued");
                pending.insert(path);
                let now = Instant::now();
                deadline = Some(now.checked_add(delay).unwrap_or(now));
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let batch = std::mem::take(&mut pending);
                if out.send(batch).await.is_err() {
                    break;
                }
            }
        }
    }
}
