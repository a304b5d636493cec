//! Per-participant wager totals for the round currently collecting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Accumulated stake of one participant within one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStake {
    pub participant_id: String,
    /// First-seen value; later wagers never rename.
    pub display_name: Option<String>,
    pub total_stake: f64,
    /// Most recent auto-cashout hint, overwritten by each wager.
    pub last_auto_cashout_hint: Option<f64>,
}

/// Merges wagers into one `ParticipantStake` per participant.
///
/// Iteration order is first-wager order.
#[derive(Debug, Clone, Default)]
pub struct BetAggregator {
    stakes: Vec<ParticipantStake>,
    index: HashMap<String, usize>,
}

impl BetAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one wager. Returns `true` if this is the participant's first
    /// wager in the round.
    pub fn record(
        &mut self,
        participant_id: &str,
        display_name: Option<&str>,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> bool {
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };

        if let Some(&slot) = self.index.get(participant_id) {
            let stake = &mut self.stakes[slot];
            stake.total_stake += amount;
            stake.last_auto_cashout_hint = auto_cashout;
            return false;
        }

        self.index.insert(participant_id.to_string(), self.stakes.len());
        self.stakes.push(ParticipantStake {
            participant_id: participant_id.to_string(),
            display_name: display_name.map(str::to_string),
            total_stake: amount,
            last_auto_cashout_hint: auto_cashout,
        });
        true
    }

    pub fn get(&self, participant_id: &str) -> Option<&ParticipantStake> {
        self.index.get(participant_id).map(|&slot| &self.stakes[slot])
    }

    pub fn participant_count(&self) -> usize {
        self.stakes.len()
    }

    pub fn total_staked(&self) -> f64 {
        self.stakes.iter().map(|s| s.total_stake).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// Owned copy of all stakes in first-wager order.
    pub fn snapshot(&self) -> Vec<ParticipantStake> {
        self.stakes.clone()
    }

    pub fn clear(&mut self) {
        self.stakes.clear();
        self.index.clear();
    }
}
