//! Periodic self-ping that keeps an idle-suspending host awake.
//!
//! Purely outbound: it never reads or mutates round state, and failures are
//! only logged.

use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::utils::wait_for_shutdown;

/// Issues a GET to a fixed URL on every tick until shutdown.
#[derive(Clone)]
pub struct SelfPinger {
    client: Client,
    url: String,
    interval: Duration,
}

impl SelfPinger {
    pub fn new(url: impl Into<String>, interval: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            interval,
        })
    }

    /// Sends one ping. Returns the HTTP status on success.
    pub async fn ping(&self) -> Result<u16, reqwest::Error> {
        let response = self.client.get(&self.url).send().await?;
        Ok(response.status().as_u16())
    }

    /// Pings every `interval` until shutdown is requested.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Self-ping every {}s to {}", self.interval.as_secs(), self.url);
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.ping().await {
                        Ok(status) => debug!("Self-ping {} -> {}", self.url, status),
                        Err(e) => warn!("Self-ping {} failed: {}", self.url, e),
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        debug!("Self-ping stopped");
    }
}

impl std::fmt::Debug for SelfPinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfPinger")
            .field("url", &self.url)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_run_future_can_be_spawned() {
        let pinger = SelfPinger::new("http://127.0.0.1:9/", Duration::from_secs(60)).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let fut = pinger.run(stop_rx);
        assert_send(&fut);
    }

    #[tokio::test]
    async fn test_pings_until_shutdown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let pinger = SelfPinger::new(format!("http://{}/", addr), Duration::from_millis(20)).unwrap();
        assert_eq!(pinger.ping().await.unwrap(), 200);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(pinger.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(150)).await;
        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(hits.load(Ordering::SeqCst) >= 2);
    }
}
