//! Process orchestration: wires the stream client, the round watcher and the
//! query surface together and owns the shutdown sequence.

mod executor;

pub use executor::{ObserverService, ServiceError};
