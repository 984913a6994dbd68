use thiserror::Error;

/// Errors produced by the client layer. Server-side failures arrive as the
/// discrete status codes of the API's error taxonomy and are mirrored here.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request never completed (connection refused, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The session cookie is missing or no longer known to the server.
    #[error("Authentication required")]
    Unauthenticated,

    /// Authenticated, but not a participant/member of the resource.
    #[error("Forbidden")]
    Forbidden,

    /// The resource does not exist (yet).
    #[error("Not found")]
    NotFound,

    /// The request collided with existing state (duplicate name, invalid
    /// removal).
    #[error("Conflict")]
    Conflict,

    /// Any other non-success status.
    #[error("Unexpected status: {0}")]
    Status(u16),
}

impl ClientError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            other => Self::Status(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
