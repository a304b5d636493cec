//! Round reconstruction: state machine, wager aggregation and history.
//!
//! Everything here is synchronous and owned by a single consumer task, so no
//! locking is involved. Readers only ever see owned snapshots.

mod aggregator;
mod category;
mod history;
mod state_machine;

pub use aggregator::{BetAggregator, ParticipantStake};
pub use category::Category;
pub use history::HistoryStore;
pub use state_machine::{
    FinalizedRound,
    RoundNotification,
    RoundSnapshot,
    RoundStateMachine,
    WagerRejection,
};
