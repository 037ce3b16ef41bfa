//! Surface bridge
//!
//! Dispatches messages from UI surfaces to the session manager and shapes
//! the replies. Session loss (expired, revoked, never signed in) is reported
//! as a plain unauthenticated state rather than as an error, so surfaces
//! fall back to their signed-out view without an error dialog.

pub mod messages;

pub use messages::{AuthRequest, AuthResponse};

use crate::error::AuthError;
use crate::services::{RegisterInput, SessionManager};

/// Handle one message from a UI surface
pub async fn handle_message(manager: &SessionManager, request: AuthRequest) -> AuthResponse {
    tracing::debug!("Handling {} message", request.name());

    let result = match request {
        AuthRequest::GetAuthState => return AuthResponse::State(manager.snapshot().await),
        AuthRequest::Mount => return AuthResponse::State(manager.on_surface_mount().await),
        AuthRequest::Login { email, password } => manager
            .login_with_password(&email, &password)
            .await
            .map(|_| ()),
        AuthRequest::Register {
            email,
            username,
            password,
            password_confirmation,
        } => manager
            .register(&RegisterInput::new(email, username, password, password_confirmation))
            .await
            .map(|_| ()),
        AuthRequest::GoogleLogin { id_token } => {
            manager.login_with_google(&id_token).await.map(|_| ())
        }
        AuthRequest::Logout => {
            return match manager.logout().await {
                Ok(outcome) => AuthResponse::LoggedOut {
                    server_revoked: outcome.server_revoked,
                },
                Err(e) => error_response(manager, e).await,
            }
        }
        AuthRequest::RefreshProfile => manager.refresh_profile().await.map(|_| ()),
    };

    match result {
        Ok(()) => AuthResponse::State(manager.snapshot().await),
        Err(e) => error_response(manager, e).await,
    }
}

async fn error_response(manager: &SessionManager, error: AuthError) -> AuthResponse {
    if error.is_session_loss() {
        return AuthResponse::State(manager.snapshot().await);
    }
    tracing::debug!("Replying with {:?} error", error.kind());
    AuthResponse::from_error(&error)
}
