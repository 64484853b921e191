//! Bounded adapter calls.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs `f` on a worker thread and waits at most `bound` for its result.
///
/// Returns `None` on timeout; the worker is left to finish in the
/// background so a stalled adapter cannot block the rest of the batch.
pub(crate) fn run_bounded<T, F>(bound: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::spawn(move || {
        // The receiver may be gone after a timeout.
        let _ = tx.send(f());
    });
    rx.recv_timeout(bound).ok()
}
