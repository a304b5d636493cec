//! Helpers around the process-wide `watch<bool>` shutdown flag.
//!
//! The `watch::Ref` returned by `wait_for` is a read guard and must not live
//! across an await in a spawned task, so callers go through these instead.

use std::time::Duration;
use tokio::sync::watch;

/// Resolves once shutdown is requested or the shutdown sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleeps for `delay`; returns `true` if shutdown was requested meanwhile.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {
            let stop = *shutdown.borrow();
            stop
        }
        _ = wait_for_shutdown(shutdown) => true,
    }
}
