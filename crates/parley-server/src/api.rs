//! REST API surface.
//!
//! Handlers stay thin: they parse the request, call one service, and shape
//! the response. Notification clears live here because the ordering
//! guarantee is endpoint-level (clear only after the read that consumed
//! the data has succeeded).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_shared::api::{
    ConversationDto, CreateConversationRequest, CreateGroupRequest, GroupDto,
    MessageCountResponse, MessageDto, NotificationDto, OAuthUriResponse, SendMessageRequest,
    UpdateGroupRequest, UserDto,
};
use parley_shared::{ConversationId, GroupId, NotificationKind, UserId};
use parley_store::{Conversation, Database, Group, Message, Notification, User};

use crate::auth::{session_middleware, CurrentUser, OAuthClient, Sessions};
use crate::config::ServerConfig;
use crate::conversations::ConversationDirectory;
use crate::error::ApiError;
use crate::groups::GroupRegistry;
use crate::messages::MessageLedger;
use crate::notifications::NotificationLedger;
use crate::rate_limit::{rate_limit_middleware, RequestGovernor};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub sessions: Sessions,
    pub oauth: Arc<OAuthClient>,
    pub governor: RequestGovernor,
    pub config: Arc<ServerConfig>,
    pub conversations: ConversationDirectory,
    pub messages: MessageLedger,
    pub notifications: NotificationLedger,
    pub groups: GroupRegistry,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let notifications = NotificationLedger::new(db.clone());
        let conversations = ConversationDirectory::new(db.clone());
        let messages = MessageLedger::new(
            db.clone(),
            conversations.clone(),
            notifications.clone(),
            config.max_message_length,
        );
        let groups = GroupRegistry::new(db.clone(), notifications.clone());
        let governor = RequestGovernor::per_minute(config.rate_limit_per_minute);

        Self {
            oauth: Arc::new(OAuthClient::new(config.oauth.clone())),
            sessions: Sessions::new(),
            config: Arc::new(config),
            db,
            governor,
            conversations,
            messages,
            notifications,
            groups,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    // Everything under /api except the OAuth bootstrap requires a session.
    let protected = Router::new()
        .route("/api/user", get(current_user))
        .route("/api/users", get(list_users))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/messages", post(send_message))
        .route("/api/messages/:id", get(list_messages))
        .route("/api/messages/:id/count", get(count_messages))
        .route("/api/notifications", get(list_notifications))
        .route("/api/groups", get(my_groups).post(create_group))
        .route("/api/groups/all", get(all_groups))
        .route("/api/groups/:id", get(get_group).put(update_group))
        .route("/api/groups/:id/join", post(join_group))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/oauth", get(oauth_callback))
        .route("/api/oauth/uri", get(oauth_uri))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.governor.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// DTO mapping
// ---------------------------------------------------------------------------

fn user_dto(user: User) -> UserDto {
    UserDto {
        id: user.id.0,
        display_name: user.display_name,
        avatar_url: user.avatar_url,
    }
}

fn conversation_dto(conversation: Conversation) -> ConversationDto {
    ConversationDto {
        id: conversation.id.0,
        participants: conversation.participants.map(|p| p.0).to_vec(),
        last_timestamp: conversation.last_timestamp,
    }
}

fn message_dto(message: Message) -> MessageDto {
    MessageDto {
        id: message.id.to_string(),
        conversation_id: message.conversation_id.0,
        sender_id: message.sender_id.0,
        contents: message.contents,
        timestamp: message.timestamp,
    }
}

fn notification_dto(notification: Notification) -> NotificationDto {
    let (conversation_id, group_id) = match notification.kind {
        NotificationKind::NewMessages => (Some(notification.topic_id), None),
        NotificationKind::GroupChanged => (None, Some(notification.topic_id)),
    };

    NotificationDto {
        id: notification.id.to_string(),
        kind: notification.kind,
        conversation_id,
        group_id,
        since: notification.since,
        other_id: notification.other_id.map(|u| u.0),
        message_count: notification.message_count,
    }
}

fn group_dto(group: Group) -> GroupDto {
    GroupDto {
        id: group.id.to_string(),
        name: group.name,
        description: group.description,
        members: group.members.into_iter().map(|m| m.0).collect(),
    }
}

/// Group ids are UUIDs; anything unparsable cannot name an existing group.
fn parse_group_id(raw: &str) -> Result<GroupId, ApiError> {
    Uuid::parse_str(raw)
        .map(GroupId)
        .map_err(|_| ApiError::NotFound(format!("no such group: {raw}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn oauth_uri(State(state): State<AppState>) -> Json<OAuthUriResponse> {
    Json(OAuthUriResponse {
        uri: state.oauth.authorize_uri(),
    })
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Response, ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing oauth code".into()))?;

    let identity = state.oauth.exchange_code(&code).await?;

    {
        let db = state.db.lock().await;
        db.upsert_user(&User {
            id: identity.id.clone(),
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            created_at: Utc::now(),
        })?;
    }

    let token = state.sessions.create(identity.id.clone()).await;
    info!(user = %identity.id, "user authenticated");

    let cookie = format!(
        "{}={}; Path=/; HttpOnly",
        state.config.session_cookie, token
    );
    Ok((
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response())
}

async fn current_user(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<Json<UserDto>, ApiError> {
    let db = state.db.lock().await;
    let user = db
        .find_user(&me)?
        .ok_or_else(|| ApiError::NotFound(format!("no such user: {me}")))?;
    Ok(Json(user_dto(user)))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<Json<Vec<UserDto>>, ApiError> {
    let db = state.db.lock().await;
    let users = db
        .list_users()?
        .into_iter()
        .filter(|u| u.id != me)
        .map(user_dto)
        .collect();
    Ok(Json(users))
}

async fn get_conversation(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(peer): Path<String>,
) -> Result<Json<ConversationDto>, ApiError> {
    let conversation = state
        .conversations
        .with_peer(&me, &UserId::new(peer))
        .await?;
    Ok(Json(conversation_dto(conversation)))
}

async fn create_conversation(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<ConversationDto>, ApiError> {
    let conversation = state
        .conversations
        .get_or_create(&me, &UserId::new(request.recipient))
        .await?;
    Ok(Json(conversation_dto(conversation)))
}

#[derive(Deserialize)]
struct SinceQuery {
    timestamp: Option<DateTime<Utc>>,
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let conversation_id = ConversationId(id);
    state
        .conversations
        .require_membership(&conversation_id, &me)
        .await?;

    let messages = state.messages.list(&conversation_id, query.timestamp).await?;

    // The read succeeded; the unread marker for this conversation is spent.
    state
        .notifications
        .clear_after_read(&me, NotificationKind::NewMessages, conversation_id.as_str())
        .await;

    Ok(Json(messages.into_iter().map(message_dto).collect()))
}

async fn count_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<MessageCountResponse>, ApiError> {
    let conversation_id = ConversationId(id);
    state
        .conversations
        .require_membership(&conversation_id, &me)
        .await?;

    // Count is the badge path: it must not consume the notification, or
    // the user would lose the signal without ever seeing the messages.
    let count = state.messages.count(&conversation_id, query.timestamp).await?;
    Ok(Json(MessageCountResponse { count }))
}

async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let conversation_id = ConversationId(request.conversation_id);

    match state
        .messages
        .append(&me, &conversation_id, &request.contents)
        .await?
    {
        Some(message) => Ok(Json(message_dto(message)).into_response()),
        // The empty-contents probe: nothing stored, still a success.
        None => Ok(StatusCode::CREATED.into_response()),
    }
}

async fn list_notifications(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<Json<Vec<NotificationDto>>, ApiError> {
    let notifications = state.notifications.list_for_user(&me).await?;
    Ok(Json(
        notifications.into_iter().map(notification_dto).collect(),
    ))
}

async fn my_groups(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<Json<Vec<GroupDto>>, ApiError> {
    let groups = state.groups.list_for_user(&me).await?;

    // Listing shows the user every change at once, so all group markers
    // are spent together.
    let topics: Vec<String> = groups.iter().map(|g| g.id.to_string()).collect();
    state
        .notifications
        .clear_many_after_read(&me, NotificationKind::GroupChanged, &topics)
        .await;

    Ok(Json(groups.into_iter().map(group_dto).collect()))
}

async fn all_groups(State(state): State<AppState>) -> Result<Json<Vec<GroupDto>>, ApiError> {
    let groups = state.groups.list_all().await?;
    Ok(Json(groups.into_iter().map(group_dto).collect()))
}

async fn create_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<Json<GroupDto>, ApiError> {
    let group = state
        .groups
        .create(&me, &request.name, &request.description)
        .await?;
    Ok(Json(group_dto(group)))
}

async fn get_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<GroupDto>, ApiError> {
    let group_id = parse_group_id(&id)?;
    let group = state.groups.fetch_for_member(group_id, &me).await?;

    state
        .notifications
        .clear_after_read(&me, NotificationKind::GroupChanged, &group_id.to_string())
        .await;

    Ok(Json(group_dto(group)))
}

async fn update_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateGroupRequest>,
) -> Result<Json<GroupDto>, ApiError> {
    let group_id = parse_group_id(&id)?;
    let group = state.groups.update(group_id, &me, &request).await?;
    Ok(Json(group_dto(group)))
}

async fn join_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<GroupDto>, ApiError> {
    let group_id = parse_group_id(&id)?;
    let group = state.groups.join(group_id, &me).await?;
    Ok(Json(group_dto(group)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
