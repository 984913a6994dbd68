//! # parley-store
//!
//! SQLite-backed document store for the Parley chat service.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for each of the
//! five record collections (users, conversations, messages, notifications,
//! groups). Two properties the rest of the system leans on:
//!
//! - every outward-facing record carries a public `id` field populated from
//!   the table primary key, and
//! - the notification upsert-and-increment is a single atomic SQL statement,
//!   never a read-modify-write, so concurrent senders cannot lose updates.

pub mod conversations;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
