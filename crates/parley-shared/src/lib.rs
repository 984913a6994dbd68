//! # parley-shared
//!
//! Types shared between the Parley server and client: identifier newtypes,
//! the canonical conversation key, notification kinds, and the request /
//! response records exchanged over the REST API.
//!
//! The conversation key lives here deliberately: both ends must derive the
//! same identifier for a pair of users without coordinating, so the function
//! has to be pure and available to everyone.

pub mod api;
pub mod types;

pub use types::{ConversationId, GroupId, NotificationKind, UserId};
