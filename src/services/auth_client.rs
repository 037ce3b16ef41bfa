//! Credential acquirer
//!
//! Talks to the backend's `/api/v1/auth/*` endpoints and turns every outcome
//! into either a token grant or an [`AuthError`]:
//! - Password login and registration
//! - Google ID-token login
//! - Bearer-authenticated refresh, logout and current-user calls
//!
//! The acquirer never reads or writes the session store. Persisting what it
//! returns is the session manager's job.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{AuthError, AuthResult};
use crate::models::token::decode_untrusted_payload;
use crate::models::UserProfile;

/// Minimum password length the backend accepts
pub const MIN_PASSWORD_LENGTH: usize = 6;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const REGISTER_PATH: &str = "/api/v1/auth/register";
const GOOGLE_PATH: &str = "/api/v1/auth/google";
const REFRESH_PATH: &str = "/api/v1/auth/refresh";
const LOGOUT_PATH: &str = "/api/v1/auth/logout";
const CURRENT_USER_PATH: &str = "/api/v1/auth/me";

/// Token and profile returned by a successful sign-in
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct UserResponse {
    user: UserProfile,
}

/// Input for account registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password_confirmation: String,
}

impl RegisterInput {
    /// Create a new registration input
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        password_confirmation: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            password_confirmation: password_confirmation.into(),
        }
    }

    /// Check the input locally, reporting the first violated rule
    pub fn validate(&self) -> AuthResult<()> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(AuthError::validation("email", "Email can't be blank"));
        }
        if !email.contains('@') {
            return Err(AuthError::validation("email", "Email is invalid"));
        }

        if self.username.trim().is_empty() {
            return Err(AuthError::validation("username", "Username can't be blank"));
        }

        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::validation(
                "password",
                format!(
                    "Password is too short (minimum is {} characters)",
                    MIN_PASSWORD_LENGTH
                ),
            ));
        }

        if self.password != self.password_confirmation {
            return Err(AuthError::validation(
                "password_confirmation",
                "Password confirmation doesn't match Password",
            ));
        }

        Ok(())
    }
}

fn validate_login(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::validation("email", "Email can't be blank"));
    }
    if password.is_empty() {
        return Err(AuthError::validation("password", "Password can't be blank"));
    }
    Ok(())
}

/// Reject a provider token that says its email is unverified.
///
/// Tokens that cannot be decoded are left for the backend to judge.
fn precheck_google_token(id_token: &str) -> AuthResult<()> {
    if id_token.trim().is_empty() {
        return Err(AuthError::validation("id_token", "ID token is required"));
    }

    if let Ok(payload) = decode_untrusted_payload(id_token) {
        let unverified = match payload.get("email_verified") {
            Some(Value::Bool(verified)) => !verified,
            Some(Value::String(verified)) => verified.eq_ignore_ascii_case("false"),
            _ => false,
        };
        if unverified {
            return Err(AuthError::OAuthInvalid(
                "Google account email is not verified".to_string(),
            ));
        }
    }

    Ok(())
}

/// Backend auth operations
///
/// Implementations must be safe to share between tasks. Every method maps
/// transport failures to `Network`, 5xx responses to `Server` and
/// undecodable success bodies to `MalformedResponse`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange email and password for a token
    async fn login(&self, email: &str, password: &str) -> AuthResult<AuthGrant>;

    /// Create an account and sign in to it
    async fn register(&self, input: &RegisterInput) -> AuthResult<AuthGrant>;

    /// Exchange a Google ID token for a token
    async fn login_with_google(&self, id_token: &str) -> AuthResult<AuthGrant>;

    /// Exchange a token for one with a later expiry
    async fn refresh(&self, token: &str) -> AuthResult<String>;

    /// Revoke a token on the backend
    async fn logout(&self, token: &str) -> AuthResult<()>;

    /// Fetch the profile of the token's subject
    async fn current_user(&self, token: &str) -> AuthResult<UserProfile>;

    /// Make an arbitrary bearer-authenticated JSON call
    async fn call_json(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
    ) -> AuthResult<Value>;
}

/// How a 401 is reported for a given endpoint
#[derive(Clone, Copy)]
enum Rejection {
    Credentials,
    OAuth,
    /// Account creation: a 401 is a refused form, not a lost session
    Form,
    Bearer,
}

/// HTTP implementation of [`AuthApi`] using reqwest
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from the backend configuration
    pub fn from_config(config: &BackendConfig) -> AuthResult<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send(&self, request: RequestBuilder, rejection: Rejection) -> AuthResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Backend answered {}", status);
        Err(error_for_status(status, &body, rejection))
    }

    async fn grant(&self, path: &str, body: Value, rejection: Rejection) -> AuthResult<AuthGrant> {
        let response = self
            .send(self.request(Method::POST, path).json(&body), rejection)
            .await?;
        Ok(response.json::<AuthGrant>().await?)
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn login(&self, email: &str, password: &str) -> AuthResult<AuthGrant> {
        validate_login(email, password)?;
        self.grant(
            LOGIN_PATH,
            json!({ "email": email.trim(), "password": password }),
            Rejection::Credentials,
        )
        .await
    }

    async fn register(&self, input: &RegisterInput) -> AuthResult<AuthGrant> {
        input.validate()?;
        self.grant(
            REGISTER_PATH,
            json!({
                "email": input.email.trim(),
                "username": input.username.trim(),
                "password": input.password,
                "password_confirmation": input.password_confirmation,
            }),
            Rejection::Form,
        )
        .await
    }

    async fn login_with_google(&self, id_token: &str) -> AuthResult<AuthGrant> {
        precheck_google_token(id_token)?;
        self.grant(GOOGLE_PATH, json!({ "id_token": id_token }), Rejection::OAuth)
            .await
    }

    async fn refresh(&self, token: &str) -> AuthResult<String> {
        let response = self
            .send(
                self.request(Method::POST, REFRESH_PATH).bearer_auth(token),
                Rejection::Bearer,
            )
            .await?;
        Ok(response.json::<TokenResponse>().await?.token)
    }

    async fn logout(&self, token: &str) -> AuthResult<()> {
        self.send(
            self.request(Method::DELETE, LOGOUT_PATH).bearer_auth(token),
            Rejection::Bearer,
        )
        .await?;
        Ok(())
    }

    async fn current_user(&self, token: &str) -> AuthResult<UserProfile> {
        let response = self
            .send(
                self.request(Method::GET, CURRENT_USER_PATH).bearer_auth(token),
                Rejection::Bearer,
            )
            .await?;
        Ok(response.json::<UserResponse>().await?.user)
    }

    async fn call_json(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
    ) -> AuthResult<Value> {
        let mut request = self.request(method, path).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.send(request, Rejection::Bearer).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

fn error_for_status(status: StatusCode, body: &str, rejection: Rejection) -> AuthError {
    let parsed = parse_error_body(body);
    match status.as_u16() {
        400 | 422 => match parsed {
            Some((field, message)) => AuthError::Validation { field, message },
            None => AuthError::Validation {
                field: None,
                message: "Request was rejected".to_string(),
            },
        },
        401 => match (rejection, parsed) {
            (Rejection::Credentials, _) => AuthError::invalid_credentials(),
            (Rejection::Form, Some((field, message))) => AuthError::Validation { field, message },
            (Rejection::Form, None) => AuthError::Validation {
                field: None,
                message: "Registration was refused".to_string(),
            },
            (Rejection::OAuth, parsed) => AuthError::OAuthInvalid(
                parsed
                    .map(|(_, message)| message)
                    .unwrap_or_else(|| "Unauthorized".to_string()),
            ),
            (Rejection::Bearer, parsed) => AuthError::Unauthorized(
                parsed
                    .map(|(_, message)| message)
                    .unwrap_or_else(|| "Unauthorized".to_string()),
            ),
        },
        404 => AuthError::NotFound(
            parsed
                .map(|(_, message)| message)
                .unwrap_or_else(|| "Not found".to_string()),
        ),
        code @ 402..=499 => AuthError::Rejected {
            status: code,
            message: parsed
                .map(|(_, message)| message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request rejected").to_string()),
        },
        code => AuthError::Server {
            status: code,
            message: parsed
                .map(|(_, message)| message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        },
    }
}

/// Extract the first error message (and its field, when known) from one of
/// the body shapes the backend produces:
///
/// - `{"error": "Email has already been taken"}`
/// - `{"errors": ["Email has already been taken", ...]}`
/// - `{"errors": {"email": ["has already been taken"]}}`
fn parse_error_body(body: &str) -> Option<(Option<String>, String)> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("errors") {
        Some(Value::Array(messages)) => {
            let message = messages.iter().find_map(Value::as_str)?;
            return Some((infer_field(message), message.to_string()));
        }
        Some(Value::Object(fields)) => {
            for (field, messages) in fields {
                let message = match messages {
                    Value::Array(list) => list.iter().find_map(Value::as_str),
                    Value::String(message) => Some(message.as_str()),
                    _ => None,
                };
                if let Some(message) = message {
                    return Some((Some(field.clone()), full_message(field, message)));
                }
            }
        }
        Some(Value::String(message)) => {
            return Some((infer_field(message), message.clone()));
        }
        _ => {}
    }

    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(|message| (infer_field(message), message.to_string()))
}

/// Prefix a field-scoped message with the humanised field name
fn full_message(field: &str, message: &str) -> String {
    let human = field.replace('_', " ");
    if message.to_lowercase().starts_with(&human.to_lowercase()) {
        return message.to_string();
    }
    let mut chars = human.chars();
    match chars.next() {
        Some(first) => format!("{}{} {}", first.to_uppercase(), chars.as_str(), message),
        None => message.to_string(),
    }
}

fn infer_field(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    ["password confirmation", "password", "username", "email"]
        .iter()
        .find(|field| lower.starts_with(*field))
        .map(|field| field.replace(' ', "_"))
}
