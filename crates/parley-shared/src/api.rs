//! Request and response records for the REST API.
//!
//! Every endpoint exchanges one of these explicit records; nothing is
//! passed as loose JSON. Field names are camelCase on the wire for the
//! benefit of browser clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NotificationKind;

/// A user as exposed by `/api/user` and `/api/users`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A conversation summary. `last_timestamp` is absent until the first
/// message lands; the poller compares it against its own last-known value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: String,
    /// Exactly two participant ids, sorted.
    pub participants: Vec<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub contents: String,
    pub timestamp: DateTime<Utc>,
}

/// One notification ledger entry.
///
/// The topic field depends on the kind: `new_messages` entries carry
/// `conversation_id`, `other_id` and `message_count`; `group_changed`
/// entries carry `group_id` only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDto {
    pub id: String,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub id: String,
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub recipient: String,
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub contents: String,
}

/// Body of `POST /api/groups`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `PUT /api/groups/:id`. All fields optional; `remove` may only
/// name the requesting user themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<String>>,
}

/// Response of `GET /api/messages/:id/count`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageCountResponse {
    pub count: i64,
}

/// Response of `GET /api/oauth/uri`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthUriResponse {
    pub uri: String,
}
