//! Surface bridge message types
//!
//! UI surfaces (popup, options page, content overlays) talk to the
//! background context with JSON messages tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ErrorKind};
use crate::services::AuthSnapshot;

/// Request sent by a UI surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRequest {
    /// Read the current state without side effects other than expiry eviction
    GetAuthState,
    /// A surface just opened
    Mount,
    Login {
        email: String,
        password: String,
    },
    Register {
        email: String,
        username: String,
        password: String,
        password_confirmation: String,
    },
    GoogleLogin {
        id_token: String,
    },
    Logout,
    RefreshProfile,
}

impl AuthRequest {
    /// Short name for logs; never includes credentials
    pub fn name(&self) -> &'static str {
        match self {
            AuthRequest::GetAuthState => "get_auth_state",
            AuthRequest::Mount => "mount",
            AuthRequest::Login { .. } => "login",
            AuthRequest::Register { .. } => "register",
            AuthRequest::GoogleLogin { .. } => "google_login",
            AuthRequest::Logout => "logout",
            AuthRequest::RefreshProfile => "refresh_profile",
        }
    }
}

/// Reply sent back to the surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthResponse {
    State(AuthSnapshot),
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    LoggedOut {
        server_revoked: bool,
    },
}

impl AuthResponse {
    /// Inline error for a form
    pub fn from_error(error: &AuthError) -> Self {
        let field = match error {
            AuthError::Validation { field, .. } => field.clone(),
            _ => None,
        };
        AuthResponse::Error {
            kind: error.kind(),
            message: error.user_message(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: AuthRequest = serde_json::from_value(json!({
            "type": "login",
            "email": "alice@example.com",
            "password": "password123"
        }))
        .unwrap();
        assert_eq!(request.name(), "login");

        let request: AuthRequest = serde_json::from_value(json!({"type": "get_auth_state"})).unwrap();
        assert_eq!(request, AuthRequest::GetAuthState);
    }

    #[test]
    fn test_error_response_carries_field_and_kind() {
        let response = AuthResponse::from_error(&AuthError::validation("email", "Email has already been taken"));
        let wire = serde_json::to_value(&response).unwrap();

        assert_eq!(wire["type"], json!("error"));
        assert_eq!(wire["kind"], json!("validation"));
        assert_eq!(wire["field"], json!("email"));
        assert_eq!(wire["message"], json!("Email has already been taken"));
    }

    #[test]
    fn test_network_error_omits_field() {
        let wire = serde_json::to_value(AuthResponse::from_error(&AuthError::Network("refused".into()))).unwrap();
        assert_eq!(wire["kind"], json!("network"));
        assert!(wire.get("field").is_none());
    }
}
