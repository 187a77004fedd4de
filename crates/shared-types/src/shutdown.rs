//! Process-wide shutdown broadcast.
//!
//! A `watch::channel(false)` whose sender flips to `true` once. Every
//! suspension point selects on [`shutdown_signalled`] alongside its own work.

use tokio::sync::watch;

/// Create the shutdown broadcast pair.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown has been signalled or the sender is gone.
///
/// Returns immediately when the flag was already set before the call.
pub async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
