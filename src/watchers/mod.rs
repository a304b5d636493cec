//! Watcher subsystems.
//!
//! The round watcher is the only component that mutates round state; every
//! other task observes it through the published views.

mod round_watcher;

pub use round_watcher::{RoundViews, RoundWatcher};
