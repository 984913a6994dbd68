//! # parley-client
//!
//! Client-side library for the Parley chat service: a typed HTTP client for
//! the REST API and the polling loop that discovers new messages and group
//! changes without any push channel.
//!
//! The poller is the interesting half. Per tracked peer it fetches the
//! conversation summary, compares the server's `lastTimestamp` with its own
//! last-known value, and only when something is newer does it pay for more:
//! the full message history if that conversation is open locally, a bare
//! unread count otherwise. Batches never overlap; the next tick is
//! scheduled only after every fetch of the previous one has settled.

pub mod events;
pub mod http;
pub mod poller;
pub mod state;

mod error;

pub use error::ClientError;
pub use events::PollerEvent;
pub use http::ApiClient;
pub use poller::{ChatFeed, Poller, PollerHandle, DEFAULT_POLL_INTERVAL};
pub use state::{ClientState, PeerPhase};
