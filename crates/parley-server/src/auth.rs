//! Session handling and the external OAuth handoff.
//!
//! Sessions are opaque bearer tokens carried in a cookie and resolved
//! against an in-process table. The table lives for the process lifetime:
//! there is no expiry or logout path (a gap inherited from the system this
//! replaces, recorded in DESIGN.md rather than silently fixed).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use serde::Deserialize;
use tokio::sync::RwLock;

use parley_shared::UserId;

use crate::api::AppState;
use crate::config::OAuthConfig;
use crate::error::ApiError;

/// The authenticated user of the current request, inserted into request
/// extensions by [`session_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

/// In-process session table: opaque token -> user id.
#[derive(Clone, Default)]
pub struct Sessions {
    table: Arc<RwLock<HashMap<String, UserId>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token for a user and register it.
    pub async fn create(&self, user_id: UserId) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.table.write().await.insert(token.clone(), user_id);
        token
    }

    /// Resolve a token to its user, `None` for unknown tokens.
    pub async fn lookup(&self, token: &str) -> Option<UserId> {
        self.table.read().await.get(token).cloned()
    }
}

/// Extract the session token from the `Cookie` header.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;

    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name).then(|| value.to_string())
    })
}

/// Reject any request without a valid session before it reaches a handler.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers(), &state.config.session_cookie)
        .ok_or(ApiError::Unauthenticated)?;

    let user_id = state
        .sessions
        .lookup(&token)
        .await
        .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}

// ---------------------------------------------------------------------------
// OAuth handoff
// ---------------------------------------------------------------------------

/// Profile fields returned by the provider after a successful exchange.
/// The shape follows GitHub's `/user` endpoint; `login` is preferred as the
/// stable identifier, falling back to the numeric `id`.
#[derive(Debug, Deserialize)]
struct ProviderProfile {
    login: Option<String>,
    id: Option<i64>,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The authenticated identity handed back by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Client for the external identity provider. The provider is a thin
/// collaborator: Parley only needs the authorize URI and a working
/// code -> token -> profile exchange.
pub struct OAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client with static configuration");
        Self { config, http }
    }

    /// The URI the browser is sent to for the provider's consent screen.
    pub fn authorize_uri(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}",
            self.config.authorize_uri, self.config.client_id, self.config.redirect_uri
        )
    }

    /// Exchange a callback code for the user's identity.
    pub async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, ApiError> {
        let token: TokenResponse = self
            .http
            .post(&self.config.token_uri)
            .header("accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ApiError::BadRequest(format!("token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::BadRequest(format!("malformed token response: {e}")))?;

        let profile: ProviderProfile = self
            .http
            .get(&self.config.profile_uri)
            .header("accept", "application/json")
            .header("user-agent", "parley-server")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| ApiError::BadRequest(format!("profile fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::BadRequest(format!("malformed profile response: {e}")))?;

        let id = profile
            .login
            .clone()
            .or_else(|| profile.id.map(|n| n.to_string()))
            .ok_or_else(|| ApiError::BadRequest("profile has no identifier".into()))?;

        let display_name = profile.name.or(profile.login).unwrap_or_else(|| id.clone());

        Ok(ExternalIdentity {
            id: UserId::new(id),
            display_name,
            avatar_url: profile.avatar_url,
        })
    }
}
