//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// OAuth provider endpoints. Defaults target a GitHub-compatible provider;
/// self-hosted deployments point these at their own identity service.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Browser-facing authorize URI the client is redirected to.
    /// Env: `OAUTH_AUTHORIZE_URI`
    pub authorize_uri: String,

    /// Endpoint where the callback code is exchanged for an access token.
    /// Env: `OAUTH_TOKEN_URI`
    pub token_uri: String,

    /// Endpoint returning the authenticated user's profile.
    /// Env: `OAUTH_PROFILE_URI`
    pub profile_uri: String,

    /// Env: `OAUTH_CLIENT_ID`
    pub client_id: String,

    /// Env: `OAUTH_CLIENT_SECRET`
    pub client_secret: String,

    /// Env: `OAUTH_REDIRECT_URI`
    pub redirect_uri: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit database file path. When unset the platform data directory
    /// is used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Maximum accepted message length in bytes.
    /// Env: `MAX_MESSAGE_LENGTH`
    /// Default: `2000`
    pub max_message_length: usize,

    /// Name of the session cookie.
    /// Default: `session` (not configurable; clients hard-code it too).
    pub session_cookie: String,

    /// Requests allowed per client IP per minute.
    /// Env: `RATE_LIMIT_PER_MINUTE`
    /// Default: `600` (a polling client at one request per second fits)
    pub rate_limit_per_minute: u32,

    pub oauth: OAuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            max_message_length: 2000,
            session_cookie: "session".to_string(),
            rate_limit_per_minute: 600,
            oauth: OAuthConfig {
                authorize_uri: "https://github.com/login/oauth/authorize".to_string(),
                token_uri: "https://github.com/login/oauth/access_token".to_string(),
                profile_uri: "https://api.github.com/user".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: "http://localhost:8080/oauth".to_string(),
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("MAX_MESSAGE_LENGTH") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_message_length = n;
            } else {
                tracing::warn!(value = %val, "Invalid MAX_MESSAGE_LENGTH, using default");
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            if let Ok(n) = val.parse::<u32>() {
                config.rate_limit_per_minute = n;
            } else {
                tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_MINUTE, using default");
            }
        }

        if let Ok(uri) = std::env::var("OAUTH_AUTHORIZE_URI") {
            config.oauth.authorize_uri = uri;
        }
        if let Ok(uri) = std::env::var("OAUTH_TOKEN_URI") {
            config.oauth.token_uri = uri;
        }
        if let Ok(uri) = std::env::var("OAUTH_PROFILE_URI") {
            config.oauth.profile_uri = uri;
        }
        if let Ok(id) = std::env::var("OAUTH_CLIENT_ID") {
            config.oauth.client_id = id;
        }
        if let Ok(secret) = std::env::var("OAUTH_CLIENT_SECRET") {
            config.oauth.client_secret = secret;
        }
        if let Ok(uri) = std::env::var("OAUTH_REDIRECT_URI") {
            config.oauth.redirect_uri = uri;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
