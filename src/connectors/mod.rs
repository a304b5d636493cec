//! Connectors for the upstream game service.
//!
//! Low-level clients only: the credential endpoint, the event socket and the
//! frame decoder. Everything produced here is normalized through the events
//! layer before it reaches round state.

pub mod frame;
mod self_ping;
mod token;
pub mod websocket;

pub use frame::{decode_frame, FrameError, FramePart};
pub use self_ping::SelfPinger;
pub use token::{extract_token, HttpTokenSource, StaticToken, TokenError, TokenSource};
pub use websocket::{ConnectionSession, ConnectionState, GameStreamSocket, WebSocketError};
