//! Typed HTTP client for the Parley REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde::de::DeserializeOwned;

use parley_shared::api::{
    ConversationDto, CreateConversationRequest, CreateGroupRequest, GroupDto,
    MessageCountResponse, MessageDto, NotificationDto, SendMessageRequest, UpdateGroupRequest,
    UserDto,
};
use parley_shared::{ConversationId, UserId};

use crate::error::{ClientError, Result};
use crate::poller::ChatFeed;

/// Name of the session cookie, mirrored from the server.
const SESSION_COOKIE: &str = "session";

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    session_token: String,
}

impl ApiClient {
    /// Build a client for a server and an already-established session
    /// token (the value of the cookie set by the OAuth handoff).
    pub fn new(base_url: &str, session_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            session_token: session_token.into(),
        })
    }

    fn cookie(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.session_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse_json<T: DeserializeOwned>(&self, resp: Response) -> Result<T> {
        if !resp.status().is_success() {
            return Err(ClientError::from_status(resp.status()));
        }
        Ok(resp.json::<T>().await?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<T> {
        let mut builder = self.http.get(self.url(path)).header("cookie", self.cookie());
        if let Some(since) = since {
            builder = builder.query(&[("timestamp", since.to_rfc3339())]);
        }
        let resp = builder.send().await?;
        self.parse_json(resp).await
    }

    // -- users ------------------------------------------------------------

    pub async fn me(&self) -> Result<UserDto> {
        self.get_json("/api/user", None).await
    }

    pub async fn users(&self) -> Result<Vec<UserDto>> {
        self.get_json("/api/users", None).await
    }

    // -- conversations -----------------------------------------------------

    pub async fn conversation_with(&self, peer: &UserId) -> Result<ConversationDto> {
        self.get_json(&format!("/api/conversations/{peer}"), None).await
    }

    pub async fn create_conversation(&self, recipient: &UserId) -> Result<ConversationDto> {
        let resp = self
            .http
            .post(self.url("/api/conversations"))
            .header("cookie", self.cookie())
            .json(&CreateConversationRequest {
                recipient: recipient.to_string(),
            })
            .send()
            .await?;
        self.parse_json(resp).await
    }

    // -- messages ----------------------------------------------------------

    pub async fn messages(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>> {
        self.get_json(&format!("/api/messages/{conversation_id}"), since)
            .await
    }

    pub async fn message_count(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let response: MessageCountResponse = self
            .get_json(&format!("/api/messages/{conversation_id}/count"), since)
            .await?;
        Ok(response.count)
    }

    /// Send a message. `None` means the server accepted an empty-contents
    /// probe without storing anything (HTTP 201).
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        contents: &str,
    ) -> Result<Option<MessageDto>> {
        let resp = self
            .http
            .post(self.url("/api/messages"))
            .header("cookie", self.cookie())
            .json(&SendMessageRequest {
                conversation_id: conversation_id.to_string(),
                contents: contents.to_string(),
            })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::CREATED {
            return Ok(None);
        }
        Ok(Some(self.parse_json(resp).await?))
    }

    // -- notifications -----------------------------------------------------

    pub async fn notifications(&self) -> Result<Vec<NotificationDto>> {
        self.get_json("/api/notifications", None).await
    }

    // -- groups ------------------------------------------------------------

    pub async fn my_groups(&self) -> Result<Vec<GroupDto>> {
        self.get_json("/api/groups", None).await
    }

    pub async fn all_groups(&self) -> Result<Vec<GroupDto>> {
        self.get_json("/api/groups/all", None).await
    }

    pub async fn group(&self, group_id: &str) -> Result<GroupDto> {
        self.get_json(&format!("/api/groups/{group_id}"), None).await
    }

    pub async fn create_group(&self, name: &str, description: &str) -> Result<GroupDto> {
        let resp = self
            .http
            .post(self.url("/api/groups"))
            .header("cookie", self.cookie())
            .json(&CreateGroupRequest {
                name: name.to_string(),
                description: description.to_string(),
            })
            .send()
            .await?;
        self.parse_json(resp).await
    }

    pub async fn update_group(
        &self,
        group_id: &str,
        request: &UpdateGroupRequest,
    ) -> Result<GroupDto> {
        let resp = self
            .http
            .put(self.url(&format!("/api/groups/{group_id}")))
            .header("cookie", self.cookie())
            .json(request)
            .send()
            .await?;
        self.parse_json(resp).await
    }

    pub async fn join_group(&self, group_id: &str) -> Result<GroupDto> {
        let resp = self
            .http
            .post(self.url(&format!("/api/groups/{group_id}/join")))
            .header("cookie", self.cookie())
            .json(&serde_json::json!({}))
            .send()
            .await?;
        self.parse_json(resp).await
    }
}

#[async_trait]
impl ChatFeed for ApiClient {
    async fn conversation_with(&self, peer: &UserId) -> Result<ConversationDto> {
        ApiClient::conversation_with(self, peer).await
    }

    async fn messages_since(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>> {
        self.messages(conversation_id, since).await
    }

    async fn message_count_since(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        self.message_count(conversation_id, since).await
    }

    async fn notifications(&self) -> Result<Vec<NotificationDto>> {
        ApiClient::notifications(self).await
    }
}
