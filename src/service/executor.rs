//! Observer service that spawns and supervises every task.
//!
//! Task layout:
//! - Stream client: owns the socket, produces `StreamEvent`s
//! - Round watcher: sole owner of round state, drains events in order
//! - Query surface: reads published snapshots
//! - Self-ping (optional): outbound only
//!
//! Shutdown flows one way: the flag is raised, the stream client closes its
//! socket and drops the event sender, the watcher drains what is left and
//! stops, then the query surface finishes in-flight requests.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::config::ObserverConfig;
use crate::connectors::{
    ConnectionSession, GameStreamSocket, HttpTokenSource, SelfPinger, TokenError, TokenSource,
};
use crate::utils::LogJournal;
use crate::watchers::RoundWatcher;

/// Capacity of the stream-to-watcher event channel.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Token client setup failed: {0}")]
    Token(#[from] TokenError),

    #[error("Query surface failed: {0}")]
    Server(std::io::Error),
}

/// Top-level service. Construct once, then `run`.
pub struct ObserverService {
    config: ObserverConfig,
    journal: LogJournal,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ObserverService {
    pub fn new(config: ObserverConfig) -> Self {
        let journal = LogJournal::new(config.log_retention);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            journal,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn journal(&self) -> LogJournal {
        self.journal.clone()
    }

    /// Handle that requests shutdown when set to `true`.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown_tx)
    }

    /// Binds the configured address and runs with the HTTP token source.
    pub async fn run(self) -> Result<(), ServiceError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind { addr, source })?;
        let token_source = HttpTokenSource::new(self.config.token_url.clone())?;
        self.run_with(listener, token_source).await
    }

    /// Runs every task until shutdown is requested and all of them stop.
    pub async fn run_with<T>(self, listener: TcpListener, token_source: T) -> Result<(), ServiceError>
    where
        T: TokenSource + 'static,
    {
        let tag = self.config.stream.channel.clone();
        info!("[{}] ObserverService starting", tag);

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (session_tx, session_rx) = watch::channel(ConnectionSession::default());

        let (watcher, views) = RoundWatcher::new(
            tag.clone(),
            self.config.history_capacity,
            event_rx,
            self.journal.clone(),
        );
        let watcher_task = tokio::spawn(watcher.run());

        let socket = GameStreamSocket::new(
            self.config.stream.clone(),
            token_source,
            event_tx,
            session_tx,
            self.journal.clone(),
        );
        let socket_task = tokio::spawn(socket.run(self.shutdown_tx.subscribe()));

        let ping_task = match &self.config.self_ping_url {
            Some(url) => match SelfPinger::new(url.clone(), self.config.self_ping_interval) {
                Ok(pinger) => Some(tokio::spawn(pinger.run(self.shutdown_tx.subscribe()))),
                Err(e) => {
                    warn!("[{}] Self-ping disabled: {}", tag, e);
                    None
                }
            },
            None => None,
        };

        let state = ApiState {
            views,
            session: session_rx,
            journal: self.journal.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
            started_at: Utc::now(),
        };
        let server_task = tokio::spawn(api::serve(listener, state, self.shutdown_tx.subscribe()));

        let signal_task = tokio::spawn(watch_ctrl_c(
            Arc::clone(&self.shutdown_tx),
            self.journal.clone(),
        ));

        info!("[{}] All tasks started. Press Ctrl+C to stop.", tag);

        if let Err(e) = socket_task.await {
            error!("[{}] Stream client task panicked: {}", tag, e);
        }
        if !*self.shutdown_tx.borrow() {
            error!("[{}] Stream client stopped unexpectedly, shutting down", tag);
            self.shutdown_tx.send_replace(true);
        }

        if let Err(e) = watcher_task.await {
            error!("[{}] Round watcher task panicked: {}", tag, e);
        }

        if let Some(task) = ping_task {
            if let Err(e) = task.await {
                error!("[{}] Self-ping task panicked: {}", tag, e);
            }
        }

        signal_task.abort();

        let served = match server_task.await {
            Ok(result) => result.map_err(ServiceError::Server),
            Err(e) => {
                error!("[{}] Query surface task panicked: {}", tag, e);
                Ok(())
            }
        };

        self.journal.record("SHUTDOWN_COMPLETE", json!({ "channel": tag }));
        info!("[{}] ObserverService stopped", tag);
        served
    }
}

impl std::fmt::Debug for ObserverService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverService")
            .field("channel", &self.config.stream.channel)
            .field("port", &self.config.port)
            .field("stopping", &*self.shutdown_tx.borrow())
            .finish()
    }
}

/// Raises the shutdown flag on Ctrl+C.
async fn watch_ctrl_c(shutdown: Arc<watch::Sender<bool>>, journal: LogJournal) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
            journal.record("SHUTDOWN_REQUESTED", json!({ "reason": "signal" }));
            shutdown.send_replace(true);
        }
        Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
    }
}
