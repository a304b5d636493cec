//! Authoritative in-memory state of the round in progress.
//!
//! Transitions are driven only by stream events, never by time:
//! `Unknown -> Collecting -> Settling`, reset to `Unknown` after every
//! settlement. The machine never rejects an event for arriving in the
//! "wrong" state; it finalizes with whatever it knows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{RoundId, RoundStatus, StreamEvent, Wager};

use super::aggregator::{BetAggregator, ParticipantStake};
use super::category::Category;
use super::history::HistoryStore;

/// Immutable record of a settled round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedRound {
    pub round_id: Option<RoundId>,
    pub settlement_value: Option<f64>,
    pub derived_category: Option<Category>,
    pub participants: Vec<ParticipantStake>,
    pub participant_count: usize,
    pub total_staked: f64,
    pub finalized_at: DateTime<Utc>,
}

/// Read-only view of the round in progress.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub round_id: Option<RoundId>,
    pub status: RoundStatus,
    pub settlement_delta: Option<f64>,
    pub participants: Vec<ParticipantStake>,
    pub participant_count: usize,
    pub total_staked: f64,
    pub dropped_wagers: u64,
}

/// Why a wager left the round untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WagerRejection {
    NotCollecting(RoundStatus),
    MissingParticipant,
}

/// Derived notifications produced while applying events.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundNotification {
    /// First accepted wager since the round entered `Collecting`.
    CollectingStarted { round_id: Option<RoundId> },

    /// Once per round, on the first observed `Settling` status.
    AggregateReady {
        round_id: Option<RoundId>,
        participant_count: usize,
        total_staked: f64,
    },

    /// Once per round, the first time the delta is known while `Settling`.
    DeltaKnown {
        round_id: Option<RoundId>,
        delta: f64,
    },

    WagerDropped(WagerRejection),

    Finalized(FinalizedRound),
}

/// Round state machine with its embedded wager aggregator and the
/// finalized-round history it writes to.
#[derive(Debug)]
pub struct RoundStateMachine {
    round_id: Option<RoundId>,
    status: RoundStatus,
    delta: Option<f64>,
    bets: BetAggregator,
    dropped_wagers: u64,

    // One-shot latches, cleared only by `reset`. `collecting_started`
    // re-arms whenever status leaves `Collecting`.
    aggregate_sent: bool,
    delta_sent: bool,
    collecting_started: bool,

    history: HistoryStore,
}

impl RoundStateMachine {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            round_id: None,
            status: RoundStatus::Unknown,
            delta: None,
            bets: BetAggregator::new(),
            dropped_wagers: 0,
            aggregate_sent: false,
            delta_sent: false,
            collecting_started: false,
            history: HistoryStore::new(history_capacity),
        }
    }

    pub fn round_id(&self) -> Option<&RoundId> {
        self.round_id.as_ref()
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn delta(&self) -> Option<f64> {
        self.delta
    }

    pub fn participant(&self, participant_id: &str) -> Option<&ParticipantStake> {
        self.bets.get(participant_id)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Applies one event. Each call is self-contained: whatever the event
    /// holds, the machine stays consistent for the next one.
    pub fn apply(&mut self, event: StreamEvent, now: DateTime<Utc>) -> Vec<RoundNotification> {
        match event {
            StreamEvent::StatusUpdate {
                round_id,
                status,
                delta,
            } => self.apply_status_update(round_id, status, delta),
            StreamEvent::WagerPlaced(wager) => self.apply_wager(wager),
            StreamEvent::Settled { round_id, value } => {
                vec![RoundNotification::Finalized(
                    self.apply_settlement(round_id, value, now),
                )]
            }
            StreamEvent::Unrecognized { .. } => Vec::new(),
        }
    }

    pub fn apply_status_update(
        &mut self,
        round_id: Option<RoundId>,
        status: Option<i64>,
        delta: Option<f64>,
    ) -> Vec<RoundNotification> {
        let mut out = Vec::new();

        if let Some(id) = round_id {
            self.adopt_round_id(id);
        }
        if let Some(code) = status {
            self.status = RoundStatus::from_code(code);
            if self.status != RoundStatus::Collecting {
                self.collecting_started = false;
            }
        }
        if let Some(delta) = delta {
            self.delta = Some(delta);
        }

        if self.status == RoundStatus::Settling {
            if !self.aggregate_sent {
                self.aggregate_sent = true;
                out.push(RoundNotification::AggregateReady {
                    round_id: self.round_id.clone(),
                    participant_count: self.bets.participant_count(),
                    total_staked: self.bets.total_staked(),
                });
            }
            if let (false, Some(delta)) = (self.delta_sent, self.delta) {
                self.delta_sent = true;
                out.push(RoundNotification::DeltaKnown {
                    round_id: self.round_id.clone(),
                    delta,
                });
            }
        }

        out
    }

    pub fn apply_wager(&mut self, wager: Wager) -> Vec<RoundNotification> {
        match self.accept_wager(wager) {
            Ok(first_of_round) if first_of_round => vec![RoundNotification::CollectingStarted {
                round_id: self.round_id.clone(),
            }],
            Ok(_) => Vec::new(),
            Err(reason) => {
                self.dropped_wagers += 1;
                vec![RoundNotification::WagerDropped(reason)]
            }
        }
    }

    /// Records the wager; `Ok(true)` when it is the first accepted wager of
    /// this collecting phase.
    fn accept_wager(&mut self, wager: Wager) -> Result<bool, WagerRejection> {
        if self.status != RoundStatus::Collecting {
            return Err(WagerRejection::NotCollecting(self.status));
        }
        let participant_id = wager
            .participant_id
            .as_deref()
            .ok_or(WagerRejection::MissingParticipant)?;

        if let Some(claimed) = wager.round_id {
            if self.round_id.is_none() {
                self.round_id = Some(claimed);
            } else if let Some(current) = self.round_id.as_ref().filter(|c| **c != claimed) {
                debug!("Wager tagged {} counted toward round {}", claimed, current);
            }
        }

        self.bets.record(
            participant_id,
            wager.display_name.as_deref(),
            wager.amount,
            wager.auto_cashout,
        );

        let first = !self.collecting_started;
        self.collecting_started = true;
        Ok(first)
    }

    /// Finalizes the round, archives it and resets to an empty `Unknown`
    /// round. Returns the archived record.
    pub fn apply_settlement(
        &mut self,
        round_id: Option<RoundId>,
        settlement_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> FinalizedRound {
        let record = FinalizedRound {
            round_id: round_id.or_else(|| self.round_id.take()),
            settlement_value,
            derived_category: settlement_value.map(Category::from_value),
            participants: self.bets.snapshot(),
            participant_count: self.bets.participant_count(),
            total_staked: self.bets.total_staked(),
            finalized_at: now,
        };

        self.history.push(record.clone());
        self.reset();
        record
    }

    /// Owned view of the round in progress.
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round_id.clone(),
            status: self.status,
            settlement_delta: self.delta,
            participants: self.bets.snapshot(),
            participant_count: self.bets.participant_count(),
            total_staked: self.bets.total_staked(),
            dropped_wagers: self.dropped_wagers,
        }
    }

    fn adopt_round_id(&mut self, id: RoundId) {
        if let Some(current) = &self.round_id {
            if *current != id {
                debug!("Keeping round id {} (update announced {})", current, id);
            }
            return;
        }
        self.round_id = Some(id);
    }

    fn reset(&mut self) {
        self.round_id = None;
        self.status = RoundStatus::Unknown;
        self.delta = None;
        self.bets.clear();
        self.dropped_wagers = 0;
        self.aggregate_sent = false;
        self.delta_sent = false;
        self.collecting_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wager(id: &str, amount: f64, hint: Option<f64>) -> StreamEvent {
        StreamEvent::WagerPlaced(Wager {
            participant_id: Some(id.to_string()),
            display_name: Some(format!("name-{}", id)),
            amount,
            auto_cashout: hint,
            round_id: None,
        })
    }

    fn update(id: Option<&str>, status: Option<i64>, delta: Option<f64>) -> StreamEvent {
        StreamEvent::StatusUpdate {
            round_id: id.map(RoundId::from),
            status,
            delta,
        }
    }

    fn settle(id: Option<&str>, value: Option<f64>) -> StreamEvent {
        StreamEvent::Settled {
            round_id: id.map(RoundId::from),
            value,
        }
    }

    #[test]
    fn test_wagers_ignored_unless_collecting() {
        let mut machine = RoundStateMachine::new(10);
        let out = machine.apply(wager("u1", 10.0, None), Utc::now());
        assert_eq!(
            out,
            vec![RoundNotification::WagerDropped(WagerRejection::NotCollecting(
                RoundStatus::Unknown
            ))]
        );
        assert!(machine.snapshot().participants.is_empty());

        machine.apply(update(Some("r1"), Some(2), None), Utc::now());
        machine.apply(wager("u1", 10.0, None), Utc::now());
        let snap = machine.snapshot();
        assert!(snap.participants.is_empty());
        assert_eq!(snap.dropped_wagers, 2);
    }

    #[test]
    fn test_accumulation_keeps_latest_hint() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        machine.apply(wager("u1", 4.0, Some(1.5)), Utc::now());
        machine.apply(wager("u1", 6.0, Some(3.0)), Utc::now());

        let stake = machine.participant("u1").unwrap();
        assert_eq!(stake.total_stake, 10.0);
        assert_eq!(stake.last_auto_cashout_hint, Some(3.0));
    }

    #[test]
    fn test_collecting_started_fires_once_per_phase() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        let first = machine.apply(wager("a", 1.0, None), Utc::now());
        let second = machine.apply(wager("b", 1.0, None), Utc::now());
        assert_eq!(
            first,
            vec![RoundNotification::CollectingStarted {
                round_id: Some(RoundId::from("r1"))
            }]
        );
        assert!(second.is_empty());
    }

    #[test]
    fn test_missing_participant_is_dropped() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(None, Some(1), None), Utc::now());
        let out = machine.apply(
            StreamEvent::WagerPlaced(Wager {
                participant_id: None,
                display_name: None,
                amount: 3.0,
                auto_cashout: None,
                round_id: None,
            }),
            Utc::now(),
        );
        assert_eq!(
            out,
            vec![RoundNotification::WagerDropped(WagerRejection::MissingParticipant)]
        );
        assert_eq!(machine.snapshot().participant_count, 0);
    }

    #[test]
    fn test_wager_adopts_round_id_when_unknown() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(None, Some(1), None), Utc::now());
        let w = Wager {
            participant_id: Some("u".to_string()),
            display_name: None,
            amount: 2.0,
            auto_cashout: None,
            round_id: Some(RoundId::from("r7")),
        };
        machine.apply(StreamEvent::WagerPlaced(w), Utc::now());
        assert_eq!(machine.round_id(), Some(&RoundId::from("r7")));
    }

    #[test]
    fn test_wagers_after_missed_settlement_still_count() {
        let mut machine = RoundStateMachine::new(10);
        let tagged = |id: &str, round: &str, amount: f64| {
            StreamEvent::WagerPlaced(Wager {
                participant_id: Some(id.to_string()),
                display_name: None,
                amount,
                auto_cashout: None,
                round_id: Some(RoundId::from(round)),
            })
        };

        machine.apply(update(Some("A"), Some(1), None), Utc::now());
        machine.apply(tagged("u1", "A", 3.0), Utc::now());
        machine.apply(update(None, Some(2), Some(1.3)), Utc::now());

        // The settlement for A never arrives; round B opens under the old id
        machine.apply(update(Some("B"), Some(1), None), Utc::now());
        let out = machine.apply(tagged("u2", "B", 10.0), Utc::now());

        assert!(!out
            .iter()
            .any(|n| matches!(n, RoundNotification::WagerDropped(_))));
        assert_eq!(machine.participant("u2").unwrap().total_stake, 10.0);
        assert_eq!(machine.round_id(), Some(&RoundId::from("A")));
        assert_eq!(machine.snapshot().dropped_wagers, 0);
    }

    #[test]
    fn test_round_id_first_writer_wins() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("first"), Some(1), None), Utc::now());
        machine.apply(update(Some("second"), None, None), Utc::now());
        assert_eq!(machine.round_id(), Some(&RoundId::from("first")));
    }

    #[test]
    fn test_settling_latches_fire_once() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        machine.apply(wager("u1", 5.0, None), Utc::now());

        let out = machine.apply(update(None, Some(2), Some(1.4)), Utc::now());
        assert_eq!(
            out,
            vec![
                RoundNotification::AggregateReady {
                    round_id: Some(RoundId::from("r1")),
                    participant_count: 1,
                    total_staked: 5.0,
                },
                RoundNotification::DeltaKnown {
                    round_id: Some(RoundId::from("r1")),
                    delta: 1.4,
                },
            ]
        );
        assert!(machine.apply(update(None, Some(2), Some(1.9)), Utc::now()).is_empty());
        assert_eq!(machine.delta(), Some(1.9));
    }

    #[test]
    fn test_delta_notification_waits_for_delta() {
        let mut machine = RoundStateMachine::new(10);
        let out = machine.apply(update(Some("r1"), Some(2), None), Utc::now());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], RoundNotification::AggregateReady { .. }));

        let out = machine.apply(update(None, None, Some(2.2)), Utc::now());
        assert_eq!(
            out,
            vec![RoundNotification::DeltaKnown {
                round_id: Some(RoundId::from("r1")),
                delta: 2.2,
            }]
        );
    }

    #[test]
    fn test_settlement_archives_copy_and_resets() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        machine.apply(wager("u1", 10.0, None), Utc::now());
        machine.apply(update(None, Some(2), Some(1.1)), Utc::now());

        let out = machine.apply(settle(None, Some(1.5)), Utc::now());
        let RoundNotification::Finalized(record) = &out[0] else {
            panic!("expected finalized record");
        };
        assert_eq!(record.round_id, Some(RoundId::from("r1")));
        assert_eq!(record.derived_category, Some(Category::Blue));
        assert_eq!(record.participant_count, 1);

        assert_eq!(machine.status(), RoundStatus::Unknown);
        assert!(machine.round_id().is_none());
        assert!(machine.delta().is_none());
        assert_eq!(machine.snapshot(), RoundSnapshot::default());

        // Latches are re-armed for the next round.
        machine.apply(update(Some("r2"), Some(1), None), Utc::now());
        machine.apply(wager("u2", 1.0, None), Utc::now());
        let out = machine.apply(update(None, Some(2), Some(1.0)), Utc::now());
        assert_eq!(out.len(), 2);

        // The archived copy is not affected by the new round.
        let history = machine.history().snapshot(10);
        assert_eq!(history[0].participants[0].participant_id, "u1");
    }

    #[test]
    fn test_explicit_settlement_id_wins() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        let record = machine.apply_settlement(Some(RoundId::from("r9")), Some(3.0), Utc::now());
        assert_eq!(record.round_id, Some(RoundId::from("r9")));
    }

    #[test]
    fn test_settlement_without_collecting_still_finalizes() {
        let mut machine = RoundStateMachine::new(10);
        let record = machine.apply_settlement(None, None, Utc::now());
        assert_eq!(record.round_id, None);
        assert_eq!(record.participant_count, 0);
        assert_eq!(record.total_staked, 0.0);
        assert_eq!(record.derived_category, None);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_repeated_settlement_inserts_one_empty_record_each() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        machine.apply(wager("u1", 3.0, None), Utc::now());

        machine.apply(settle(Some("r1"), Some(2.0)), Utc::now());
        machine.apply(settle(Some("r1"), Some(2.0)), Utc::now());

        let history = machine.history().snapshot(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].participant_count, 1);
        assert_eq!(history[0].participant_count, 0);
        assert_eq!(history[0].round_id, Some(RoundId::from("r1")));
    }

    #[test]
    fn test_unrecognized_is_a_no_op() {
        let mut machine = RoundStateMachine::new(10);
        machine.apply(update(Some("r1"), Some(1), None), Utc::now());
        let before = machine.snapshot();
        let out = machine.apply(StreamEvent::Unrecognized { kind: None }, Utc::now());
        assert!(out.is_empty());
        assert_eq!(machine.snapshot(), before);
    }
}
