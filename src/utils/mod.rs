//! Logging setup, the in-memory diagnostic journal and shutdown helpers.

mod journal;
mod shutdown;
mod telemetry;

pub use journal::{LogEntry, LogJournal};
pub use shutdown::{sleep_or_shutdown, wait_for_shutdown};
pub use telemetry::{init_telemetry, init_telemetry_json};
