//! Error taxonomy for the authentication core
//!
//! Every failure the session subsystem can surface is an [`AuthError`].
//! The enum is `Clone` because a single in-flight refresh hands its result
//! to every caller that joined it.
//!
//! Only a subset of the variants may clear a stored session; see
//! [`AuthError::clears_session`].

use serde::{Deserialize, Serialize};

/// User-visible message for rejected credentials.
///
/// Unknown email and wrong password must be indistinguishable, so the
/// backend's own wording is never forwarded.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

/// Error types for authentication and session operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Malformed input caught locally or rejected by the backend (400/422)
    #[error("Validation error: {message}")]
    Validation {
        /// Field the first violated rule refers to, when known
        field: Option<String>,
        message: String,
    },

    /// Password login rejected (401)
    #[error("{0}")]
    InvalidCredentials(String),

    /// Provider identity token rejected or email unverified
    #[error("OAuth login failed: {0}")]
    OAuthInvalid(String),

    /// An authenticated call was answered with 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The stored token is past its expiry
    #[error("Session expired")]
    TokenExpired,

    /// The backend refused to refresh the token
    #[error("Session revoked")]
    TokenRevoked,

    /// No usable session is stored
    #[error("Not signed in")]
    NotAuthenticated,

    /// The requested resource no longer exists (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other 4xx: the backend refused this request (403, 409, 429, ...).
    /// Says nothing about the session.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The backend could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a 5xx or otherwise unexpected status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// A token could not be decoded
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// A success response did not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Durable storage failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Build a validation error for a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AuthError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Build the canonical invalid-credentials error
    pub fn invalid_credentials() -> Self {
        AuthError::InvalidCredentials(INVALID_CREDENTIALS_MESSAGE.to_string())
    }

    /// Whether this error means the session is gone for good.
    ///
    /// Network failures and 5xx responses say nothing about token validity
    /// and never end a session.
    pub fn clears_session(&self) -> bool {
        matches!(self, AuthError::TokenRevoked | AuthError::TokenExpired)
    }

    /// Whether the user simply is (or became) signed out.
    ///
    /// Surfaces render these as the unauthenticated state rather than as an
    /// error.
    pub fn is_session_loss(&self) -> bool {
        matches!(
            self,
            AuthError::TokenRevoked | AuthError::TokenExpired | AuthError::NotAuthenticated
        )
    }

    /// Stable machine-readable kind, used on the surface bridge
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation { .. } => ErrorKind::Validation,
            AuthError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            AuthError::OAuthInvalid(_) => ErrorKind::OAuthInvalid,
            AuthError::Unauthorized(_)
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::NotAuthenticated => ErrorKind::SignedOut,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Rejected { .. } => ErrorKind::Rejected,
            AuthError::Network(_) => ErrorKind::Network,
            AuthError::Server { .. } | AuthError::MalformedResponse(_) => ErrorKind::Server,
            AuthError::MalformedToken(_) | AuthError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Message suitable for inline display next to a form
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation { message, .. } => message.clone(),
            AuthError::InvalidCredentials(message) => message.clone(),
            AuthError::OAuthInvalid(_) => "Google sign-in failed. Please try again.".to_string(),
            AuthError::Unauthorized(_)
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::NotAuthenticated => "You are signed out. Please sign in again.".to_string(),
            AuthError::NotFound(_) => "Your account could not be found.".to_string(),
            AuthError::Rejected { status: 429, .. } => {
                "Too many requests. Please wait a moment and retry.".to_string()
            }
            AuthError::Rejected { message, .. } => message.clone(),
            AuthError::Network(_) => {
                "Could not reach the server. Check your connection and retry.".to_string()
            }
            AuthError::Server { .. } | AuthError::MalformedResponse(_) => {
                "The server had a problem. Please retry in a moment.".to_string()
            }
            AuthError::MalformedToken(_) | AuthError::Storage(_) => {
                "Something went wrong. Please sign in again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AuthError::MalformedResponse(e.to_string())
        } else {
            AuthError::Network(e.to_string())
        }
    }
}

/// Coarse error category exposed to UI surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InvalidCredentials,
    OAuthInvalid,
    SignedOut,
    NotFound,
    Rejected,
    Network,
    Server,
    Internal,
}

/// Result alias for the authentication core
pub type AuthResult<T> = std::result::Result<T, AuthError>;
