//! Event layer for the stream observer.
//!
//! Raw socket payloads MUST be converted into normalized `StreamEvent`s
//! before they reach the round state machine. Raw JSON never drives round
//! state directly.

mod game_events;

pub use game_events::{
    as_number,
    Envelope,
    RoundId,
    RoundStatus,
    StreamEvent,
    Wager,
};
