//! In-process mock of the auth backend for tests
//!
//! Serves the `/api/v1/auth/*` endpoints plus two GIF endpoints over real
//! HTTP on an ephemeral port. Tokens are unsigned three-part tokens whose
//! expiry strictly increases with every issue, so refreshed sessions always
//! move forward even within the same second.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::token::{decode_claims, decode_untrusted_payload, encode_unsigned};
use crate::models::TokenClaims;
use crate::services::HttpAuthClient;

type Reply = (StatusCode, Json<Value>);

#[derive(Debug, Clone)]
struct MockUser {
    id: i64,
    email: String,
    username: String,
    password: String,
    google_sub: Option<String>,
}

impl MockUser {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "display_name": null,
            "avatar": null,
            "gifs_count": 0,
            "followers_count": 0,
            "following_count": 0
        })
    }
}

#[derive(Debug)]
struct Inner {
    users: Vec<MockUser>,
    next_user_id: i64,
    issue_seq: i64,
    ttl_secs: i64,
    /// jti -> subject of every token ever issued
    issued: HashMap<String, i64>,
    revoked: HashSet<String>,
    /// Tokens API endpoints reject while refresh still accepts them
    stale: HashSet<String>,
    /// Users whose every token API endpoints reject
    stale_users: HashSet<i64>,
    failure: Option<u16>,
    refresh_delay: Option<Duration>,
    last_authorization: Option<String>,
}

#[derive(Debug)]
struct MockState {
    inner: Mutex<Inner>,
    requests: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    feed_calls: AtomicUsize,
}

impl MockState {
    /// Count the request, remember its auth header and apply a forced failure
    fn begin(&self, headers: &HeaderMap) -> Result<(), Reply> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.last_authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match inner.failure {
            Some(code) => Err(reply(
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                json!({"error": "Service unavailable"}),
            )),
            None => Ok(()),
        }
    }

    fn issue(&self, user_id: i64) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.issue_seq += 1;
        let seq = inner.issue_seq;
        let jti = format!("jti-{}", seq);
        let exp = Utc::now().timestamp() + inner.ttl_secs + seq;
        inner.issued.insert(jti.clone(), user_id);
        encode_unsigned(&json!({"sub": user_id, "exp": exp, "jti": jti, "iat": Utc::now().timestamp()}))
    }

    fn authenticate(&self, headers: &HeaderMap, allow_stale: bool) -> Result<TokenClaims, Reply> {
        let unauthorized = |message: &str| reply(StatusCode::UNAUTHORIZED, json!({"error": message}));

        let header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing token"))?;
        let token = match header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token,
            _ => header,
        };

        let claims = decode_claims(token).map_err(|_| unauthorized("Invalid token"))?;
        if claims.exp <= Utc::now() {
            return Err(unauthorized("Token has expired"));
        }

        let inner = self.inner.lock().unwrap();
        let jti = claims.jti.clone().unwrap_or_default();
        if !inner.issued.contains_key(&jti) || inner.revoked.contains(&jti) {
            return Err(unauthorized("Token has been revoked"));
        }
        if !allow_stale && (inner.stale.contains(&jti) || inner.stale_users.contains(&claims.sub)) {
            return Err(unauthorized("Token is no longer accepted"));
        }
        Ok(claims)
    }

    fn grant(&self, user: &MockUser, status: StatusCode) -> Reply {
        let token = self.issue(user.id);
        reply(status, json!({"token": token, "user": user.to_json()}))
    }
}

fn reply(status: StatusCode, body: Value) -> Reply {
    (status, Json(body))
}

fn missing_param(name: &str) -> Reply {
    reply(
        StatusCode::BAD_REQUEST,
        json!({"error": format!("param is missing or the value is empty: {}", name)}),
    )
}

fn str_field<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

async fn login(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    let Some(email) = str_field(&body, "email") else {
        return missing_param("email");
    };
    let Some(password) = str_field(&body, "password") else {
        return missing_param("password");
    };

    let user = {
        let inner = state.inner.lock().unwrap();
        inner.users.iter().find(|u| u.email == email).cloned()
    };
    // Distinct wording on purpose: the client must not forward it
    match user {
        None => reply(StatusCode::UNAUTHORIZED, json!({"error": "No account for that email"})),
        Some(user) if user.password != password => {
            reply(StatusCode::UNAUTHORIZED, json!({"error": "Wrong password"}))
        }
        Some(user) => state.grant(&user, StatusCode::OK),
    }
}

async fn register(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    for name in ["email", "username", "password", "password_confirmation"] {
        if str_field(&body, name).is_none() {
            return missing_param(name);
        }
    }
    let param = |name: &str| str_field(&body, name).unwrap_or_default().to_string();
    let (email, username, password) = (param("email"), param("username"), param("password"));

    let user = {
        let mut inner = state.inner.lock().unwrap();
        let invalid = |field: &str, message: &str| {
            let mut errors = serde_json::Map::new();
            errors.insert(field.to_string(), json!([message]));
            reply(StatusCode::UNPROCESSABLE_ENTITY, json!({"errors": errors}))
        };
        if inner.users.iter().any(|u| u.email == email) {
            return invalid("email", "has already been taken");
        }
        if inner.users.iter().any(|u| u.username == username) {
            return invalid("username", "has already been taken");
        }
        if password.chars().count() < 6 {
            return invalid("password", "is too short (minimum is 6 characters)");
        }
        if password != param("password_confirmation") {
            return invalid("password_confirmation", "doesn't match Password");
        }

        let user = MockUser {
            id: inner.next_user_id,
            email,
            username,
            password,
            google_sub: None,
        };
        inner.next_user_id += 1;
        inner.users.push(user.clone());
        user
    };

    state.grant(&user, StatusCode::CREATED)
}

async fn google(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    let Some(id_token) = str_field(&body, "id_token") else {
        return missing_param("id_token");
    };
    let rejected = |message: &str| reply(StatusCode::UNAUTHORIZED, json!({"error": message}));

    let Ok(payload) = decode_untrusted_payload(id_token) else {
        return rejected("Invalid ID token");
    };
    let Some(sub) = payload.get("sub").and_then(Value::as_str).map(str::to_string) else {
        return rejected("Invalid ID token");
    };
    let email = payload.get("email").and_then(Value::as_str).unwrap_or_default().to_string();
    let verified = matches!(payload.get("email_verified"), Some(Value::Bool(true)))
        || matches!(payload.get("email_verified"), Some(Value::String(s)) if s == "true");
    if !verified || email.is_empty() {
        return rejected("Email not verified");
    }

    let user = {
        let mut inner = state.inner.lock().unwrap();
        let existing = inner
            .users
            .iter()
            .position(|u| u.google_sub.as_deref() == Some(sub.as_str()))
            .or_else(|| inner.users.iter().position(|u| u.email == email));
        if let Some(index) = existing {
            // Link the provider identity to the account with that email
            let user = &mut inner.users[index];
            user.google_sub = Some(sub);
            user.clone()
        } else {
            let username = email.split('@').next().unwrap_or("user").to_string();
            let user = MockUser {
                id: inner.next_user_id,
                email,
                username,
                password: String::new(),
                google_sub: Some(sub),
            };
            inner.next_user_id += 1;
            inner.users.push(user.clone());
            user
        }
    };

    state.grant(&user, StatusCode::OK)
}

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    let delay = state.inner.lock().unwrap().refresh_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    match state.authenticate(&headers, true) {
        Ok(claims) => reply(StatusCode::OK, json!({"token": state.issue(claims.sub)})),
        Err(rejection) => rejection,
    }
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    match state.authenticate(&headers, true) {
        Ok(claims) => {
            if let Some(jti) = claims.jti {
                state.inner.lock().unwrap().revoked.insert(jti);
            }
            reply(StatusCode::OK, json!({"message": "Logged out"}))
        }
        Err(rejection) => rejection,
    }
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    let claims = match state.authenticate(&headers, false) {
        Ok(claims) => claims,
        Err(rejection) => return rejection,
    };

    let inner = state.inner.lock().unwrap();
    match inner.users.iter().find(|u| u.id == claims.sub) {
        Some(user) => reply(StatusCode::OK, json!({"user": user.to_json()})),
        None => reply(StatusCode::NOT_FOUND, json!({"error": "User not found"})),
    }
}

async fn feed(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    match state.authenticate(&headers, false) {
        Ok(claims) => {
            state.feed_calls.fetch_add(1, Ordering::SeqCst);
            reply(StatusCode::OK, json!({"user_id": claims.sub, "gifs": []}))
        }
        Err(rejection) => rejection,
    }
}

async fn like(
    State(state): State<Arc<MockState>>,
    Path(gif_id): Path<i64>,
    headers: HeaderMap,
) -> Reply {
    if let Err(failure) = state.begin(&headers) {
        return failure;
    }
    match state.authenticate(&headers, false) {
        Ok(claims) => reply(
            StatusCode::OK,
            json!({"gif_id": gif_id, "liked_by": claims.sub, "liked": true}),
        ),
        Err(rejection) => rejection,
    }
}

/// A running mock backend; the server stops when this is dropped
pub struct MockBackend {
    base_url: String,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Start a backend seeded with `alice@example.com` / `password123` and
    /// `carol@example.com` / `hunter22`
    pub async fn start() -> Self {
        let seed = vec![
            MockUser {
                id: 1,
                email: "alice@example.com".to_string(),
                username: "alice".to_string(),
                password: "password123".to_string(),
                google_sub: None,
            },
            MockUser {
                id: 2,
                email: "carol@example.com".to_string(),
                username: "carol".to_string(),
                password: "hunter22".to_string(),
                google_sub: None,
            },
        ];

        let state = Arc::new(MockState {
            inner: Mutex::new(Inner {
                users: seed,
                next_user_id: 3,
                issue_seq: 0,
                ttl_secs: 3600,
                issued: HashMap::new(),
                revoked: HashSet::new(),
                stale: HashSet::new(),
                stale_users: HashSet::new(),
                failure: None,
                refresh_delay: None,
                last_authorization: None,
            }),
            requests: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            feed_calls: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/api/v1/auth/login", post(login))
            .route("/api/v1/auth/register", post(register))
            .route("/api/v1/auth/google", post(google))
            .route("/api/v1/auth/refresh", post(refresh))
            .route("/api/v1/auth/logout", delete(logout))
            .route("/api/v1/auth/me", get(me))
            .route("/api/v1/gifs/feed", get(feed))
            .route("/api/v1/gifs/{id}/like", post(like))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> HttpAuthClient {
        HttpAuthClient::new(&self.base_url, Duration::from_secs(5)).unwrap()
    }

    /// Mint a valid token for `user_id` without a login round trip
    pub fn issue_token(&self, user_id: i64) -> String {
        self.state.issue(user_id)
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn feed_calls(&self) -> usize {
        self.state.feed_calls.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.state.inner.lock().unwrap().users.len()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.inner.lock().unwrap().last_authorization.clone()
    }

    pub fn delete_user(&self, user_id: i64) {
        self.state.inner.lock().unwrap().users.retain(|u| u.id != user_id);
    }

    /// Answer every request with `status` until reset with `None`
    pub fn fail_with(&self, status: Option<u16>) {
        self.state.inner.lock().unwrap().failure = status;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.inner.lock().unwrap().refresh_delay = Some(delay);
    }

    /// Lifetime of tokens issued from now on
    pub fn set_ttl(&self, secs: i64) {
        self.state.inner.lock().unwrap().ttl_secs = secs;
    }

    /// Revoke every token ever issued to `user_id`
    pub fn revoke_user(&self, user_id: i64) {
        let mut inner = self.state.inner.lock().unwrap();
        let jtis: Vec<String> = inner
            .issued
            .iter()
            .filter(|(_, sub)| **sub == user_id)
            .map(|(jti, _)| jti.clone())
            .collect();
        inner.revoked.extend(jtis);
    }

    /// Make API endpoints reject `token` while refresh still accepts it
    pub fn mark_stale(&self, token: &str) {
        if let Ok(TokenClaims { jti: Some(jti), .. }) = decode_claims(token) {
            self.state.inner.lock().unwrap().stale.insert(jti);
        }
    }

    /// Make API endpoints reject every token of `user_id`, including ones
    /// issued later, while refresh still accepts them
    pub fn reject_api_for_user(&self, user_id: i64) {
        self.state.inner.lock().unwrap().stale_users.insert(user_id);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// A base URL nothing is listening on
pub fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
