//! Round watcher: the single consumer of stream events.
//!
//! Owns the round state machine outright. Events are applied strictly one at
//! a time in arrival order, which is what keeps round state race-free without
//! a lock. Readers get owned snapshots through `watch` channels.

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::events::StreamEvent;
use crate::round::{
    FinalizedRound, RoundNotification, RoundSnapshot, RoundStateMachine, WagerRejection,
};
use crate::utils::LogJournal;

/// Read side of the watcher's published state.
#[derive(Debug, Clone)]
pub struct RoundViews {
    pub round: watch::Receiver<RoundSnapshot>,
    /// Most recent first.
    pub history: watch::Receiver<Vec<FinalizedRound>>,
}

/// Applies stream events to the round state machine.
///
/// Responsibilities:
/// - Applies every event exactly once, in order
/// - Logs the derived one-shot notifications
/// - Publishes the current round and history after each change
pub struct RoundWatcher {
    tag: String,
    machine: RoundStateMachine,
    event_rx: mpsc::Receiver<StreamEvent>,
    round_tx: watch::Sender<RoundSnapshot>,
    history_tx: watch::Sender<Vec<FinalizedRound>>,
    journal: LogJournal,
    events_applied: u64,
}

impl RoundWatcher {
    /// Creates a watcher and the views it publishes to.
    pub fn new(
        tag: impl Into<String>,
        history_capacity: usize,
        event_rx: mpsc::Receiver<StreamEvent>,
        journal: LogJournal,
    ) -> (Self, RoundViews) {
        let (round_tx, round_rx) = watch::channel(RoundSnapshot::default());
        let (history_tx, history_rx) = watch::channel(Vec::new());

        let watcher = Self {
            tag: tag.into(),
            machine: RoundStateMachine::new(history_capacity),
            event_rx,
            round_tx,
            history_tx,
            journal,
            events_applied: 0,
        };
        let views = RoundViews {
            round: round_rx,
            history: history_rx,
        };
        (watcher, views)
    }

    pub fn machine(&self) -> &RoundStateMachine {
        &self.machine
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Consumes events until every sender is dropped.
    pub async fn run(mut self) {
        info!("[{}] RoundWatcher starting", self.tag);

        while let Some(event) = self.event_rx.recv().await {
            self.apply(event);
        }

        info!(
            "[{}] RoundWatcher stopped after {} events",
            self.tag, self.events_applied
        );
    }

    /// Applies one event and publishes the resulting state.
    pub fn apply(&mut self, event: StreamEvent) {
        if let StreamEvent::Unrecognized { kind } = &event {
            debug!("[{}] Ignoring event type {:?}", self.tag, kind);
            return;
        }

        debug!("[{}] Applying {} event", self.tag, event.kind());
        self.events_applied += 1;

        let notifications = self.machine.apply(event, Utc::now());
        let mut finalized = false;
        for notification in notifications {
            finalized |= matches!(notification, RoundNotification::Finalized(_));
            self.report(notification);
        }

        self.round_tx.send_replace(self.machine.snapshot());
        if finalized {
            let history = self.machine.history();
            self.history_tx.send_replace(history.snapshot(history.capacity()));
        }
    }

    fn report(&self, notification: RoundNotification) {
        match notification {
            RoundNotification::CollectingStarted { round_id } => {
                info!("[{}] Collecting wagers for round {:?}", self.tag, round_id);
                self.journal
                    .record("COLLECTING_STARTED", json!({ "roundId": round_id }));
            }

            RoundNotification::AggregateReady {
                round_id,
                participant_count,
                total_staked,
            } => {
                info!(
                    "[{}] Wagers collected for round {:?}: {} participants, {} staked",
                    self.tag, round_id, participant_count, total_staked
                );
                self.journal.record(
                    "AGGREGATE_READY",
                    json!({
                        "roundId": round_id,
                        "participantCount": participant_count,
                        "totalStaked": total_staked,
                    }),
                );
            }

            RoundNotification::DeltaKnown { round_id, delta } => {
                info!("[{}] Round {:?} delta => {}", self.tag, round_id, delta);
                self.journal
                    .record("DELTA_KNOWN", json!({ "roundId": round_id, "delta": delta }));
            }

            RoundNotification::WagerDropped(reason) => match reason {
                WagerRejection::NotCollecting(status) => {
                    debug!("[{}] Wager ignored while {}", self.tag, status);
                }
                WagerRejection::MissingParticipant => {
                    warn!("[{}] Wager without participant id dropped", self.tag);
                    self.journal
                        .record("WAGER_DROPPED", json!({ "reason": "missing participant" }));
                }
            },

            RoundNotification::Finalized(record) => {
                info!(
                    "[{}] Round {:?} settled at {:?} ({}) | participants: {} | staked: {}",
                    self.tag,
                    record.round_id,
                    record.settlement_value,
                    record
                        .derived_category
                        .map(|c| c.as_str())
                        .unwrap_or("none"),
                    record.participant_count,
                    record.total_staked
                );
                self.journal.record(
                    "ROUND_FINALIZED",
                    json!({
                        "roundId": record.round_id,
                        "settlementValue": record.settlement_value,
                        "category": record.derived_category,
                        "participantCount": record.participant_count,
                        "totalStaked": record.total_staked,
                    }),
                );
            }
        }
    }
}

impl std::fmt::Debug for RoundWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundWatcher")
            .field("tag", &self.tag)
            .field("round_id", &self.machine.round_id())
            .field("status", &self.machine.status())
            .field("events_applied", &self.events_applied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RoundId, RoundStatus, Wager};

    fn watcher(capacity: usize) -> (RoundWatcher, RoundViews, mpsc::Sender<StreamEvent>, LogJournal) {
        let (tx, rx) = mpsc::channel(16);
        let journal = LogJournal::new(64);
        let (watcher, views) = RoundWatcher::new("test", capacity, rx, journal.clone());
        (watcher, views, tx, journal)
    }

    fn bet(id: &str, amount: f64) -> StreamEvent {
        StreamEvent::WagerPlaced(Wager {
            participant_id: Some(id.to_string()),
            display_name: None,
            amount,
            auto_cashout: None,
            round_id: None,
        })
    }

    #[test]
    fn test_publishes_round_snapshot() {
        let (mut watcher, views, _tx, _journal) = watcher(5);
        watcher.apply(StreamEvent::StatusUpdate {
            round_id: Some(RoundId::from("r1")),
            status: Some(1),
            delta: None,
        });
        watcher.apply(bet("u1", 2.0));

        let round = views.round.borrow().clone();
        assert_eq!(round.status, RoundStatus::Collecting);
        assert_eq!(round.participant_count, 1);
        assert_eq!(watcher.events_applied(), 2);
    }

    #[test]
    fn test_settlement_publishes_history_and_journals() {
        let (mut watcher, views, _tx, journal) = watcher(5);
        watcher.apply(StreamEvent::StatusUpdate {
            round_id: Some(RoundId::from("r1")),
            status: Some(1),
            delta: None,
        });
        watcher.apply(bet("u1", 2.0));
        watcher.apply(StreamEvent::StatusUpdate {
            round_id: None,
            status: Some(2),
            delta: Some(1.3),
        });
        watcher.apply(StreamEvent::Settled {
            round_id: None,
            value: Some(5.0),
        });

        let history = views.history.borrow().clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_staked, 2.0);
        assert_eq!(views.round.borrow().status, RoundStatus::Unknown);

        let kinds: Vec<_> = journal.tail(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                "COLLECTING_STARTED".to_string(),
                "AGGREGATE_READY".to_string(),
                "DELTA_KNOWN".to_string(),
                "ROUND_FINALIZED".to_string(),
            ]
        );
    }

    #[test]
    fn test_unrecognized_events_are_not_counted() {
        let (mut watcher, _views, _tx, _journal) = watcher(5);
        watcher.apply(StreamEvent::Unrecognized { kind: Some("chat".to_string()) });
        assert_eq!(watcher.events_applied(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_until_senders_drop() {
        let (watcher, views, tx, _journal) = watcher(5);
        let task = tokio::spawn(watcher.run());

        tx.send(StreamEvent::Settled { round_id: Some(RoundId::from("a")), value: Some(1.0) })
            .await
            .unwrap();
        tx.send(StreamEvent::Settled { round_id: Some(RoundId::from("b")), value: Some(9.0) })
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let ids: Vec<_> = views
            .history
            .borrow()
            .iter()
            .map(|r| r.round_id.clone().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }
}
