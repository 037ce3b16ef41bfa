//! Session synchronizer
//!
//! Owns the session lifecycle of one execution context:
//! - Sign-in through the credential acquirer, persisted via the session store
//! - Proactive refresh when the token nears expiry, single-flight per context
//! - Per-request policy: refresh and retry once on 401, then give up
//! - Revocation, local expiry and logout, each ending in a cleared store
//! - Best-effort broadcast of auth events to open UI surfaces
//!
//! State is never cached across calls. Every operation re-reads the store
//! and the clock, so a fresh context (a restarted background process, a
//! newly opened popup) sees exactly what is persisted.
//!
//! Writes go through one lock and compare the stored token before replacing
//! or clearing it. A refresh that completes after a logout or a new sign-in
//! therefore never resurrects or overwrites anything.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::models::{Session, SessionPhase, UserProfile};
use crate::services::auth_client::{AuthApi, AuthGrant, RegisterInput};
use crate::services::clock::{Clock, SystemClock};
use crate::services::session_store::SessionStore;

/// Observable authentication state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    AuthenticatedFresh,
    AuthenticatedNearExpiry,
    /// A refresh request is in flight; the current token is still usable
    Refreshing,
}

/// What a UI surface needs to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub state: SessionState,
    pub user_id: Option<i64>,
    pub profile: Option<UserProfile>,
}

impl AuthSnapshot {
    fn unauthenticated() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            user_id: None,
            profile: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state != SessionState::Unauthenticated
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    LoggedOut,
    Revoked,
    Expired,
}

/// Change notification fanned out to subscribed surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn {
        user_id: i64,
        profile: UserProfile,
    },
    Refreshed {
        user_id: i64,
        expires_at: DateTime<Utc>,
    },
    ProfileUpdated {
        profile: UserProfile,
    },
    SignedOut {
        reason: SignOutReason,
    },
}

/// Result of a logout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutOutcome {
    /// False when the backend could not be told, so the token may remain
    /// valid server-side until it expires
    pub server_revoked: bool,
}

/// Session policy knobs
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Remaining lifetime at or below which a token is refreshed proactively
    pub refresh_threshold: Duration,
    /// Events buffered per subscriber before the slowest one starts missing them
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::seconds(300),
            event_capacity: 16,
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        let secs = config.refresh_threshold_secs.min(i32::MAX as u64) as i64;
        Self {
            refresh_threshold: Duration::seconds(secs),
            event_capacity: config.event_capacity,
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, AuthResult<Session>>>;

struct Inner {
    api: Arc<dyn AuthApi>,
    store: SessionStore,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    events: broadcast::Sender<AuthEvent>,
    /// The refresh every caller in this context joins while it runs
    inflight: std::sync::Mutex<Option<RefreshFuture>>,
    /// Serialises every store mutation
    write_lock: tokio::sync::Mutex<()>,
}

/// Handle to the session synchronizer of one execution context
///
/// Cloning is cheap; clones share the in-flight refresh and the event
/// channel.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.inner.settings)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager using the system clock
    pub fn new(api: Arc<dyn AuthApi>, store: SessionStore, settings: SessionSettings) -> Self {
        Self::with_clock(api, store, Arc::new(SystemClock), settings)
    }

    /// Create a manager with an explicit clock
    pub fn with_clock(
        api: Arc<dyn AuthApi>,
        store: SessionStore,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                clock,
                settings,
                events,
                inflight: std::sync::Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Subscribe to auth events.
    ///
    /// Delivery is best-effort: a receiver that lags or subscribes late
    /// misses events and should re-read [`snapshot`](Self::snapshot).
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Report the persisted state at process start
    pub async fn init(&self) -> AuthSnapshot {
        let snapshot = self.snapshot().await;
        tracing::info!("Session state at start: {:?}", snapshot.state);
        snapshot
    }

    /// Current state, derived from the store and the clock
    pub async fn state(&self) -> SessionState {
        self.snapshot().await.state
    }

    /// State plus the cached profile, for rendering
    ///
    /// An expired session is evicted here.
    pub async fn snapshot(&self) -> AuthSnapshot {
        let (session, phase) = match self.current_session().await {
            Ok(current) => current,
            Err(_) => return AuthSnapshot::unauthenticated(),
        };

        let state = if self.is_refreshing() {
            SessionState::Refreshing
        } else if phase == SessionPhase::NearExpiry {
            SessionState::AuthenticatedNearExpiry
        } else {
            SessionState::AuthenticatedFresh
        };

        AuthSnapshot {
            state,
            user_id: Some(session.user_id),
            profile: Some(session.user_profile),
        }
    }

    /// Called when a UI surface opens.
    ///
    /// Starts (or joins) a refresh when the token is near expiry. A refresh
    /// that fails for transient reasons is ignored; the old token stays in
    /// use.
    pub async fn on_surface_mount(&self) -> AuthSnapshot {
        let snapshot = self.snapshot().await;
        if matches!(
            snapshot.state,
            SessionState::AuthenticatedNearExpiry | SessionState::Refreshing
        ) {
            if let Err(e) = self.refresh().await {
                if !e.is_session_loss() {
                    tracing::warn!("Refresh on mount failed, keeping current token: {}", e);
                }
            }
            return self.snapshot().await;
        }
        snapshot
    }

    /// Sign in with email and password
    pub async fn login_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let grant = self.inner.api.login(email, password).await?;
        self.establish(grant).await
    }

    /// Create an account and sign in to it
    pub async fn register(&self, input: &RegisterInput) -> AuthResult<Session> {
        let grant = self.inner.api.register(input).await?;
        self.establish(grant).await
    }

    /// Sign in with a Google ID token
    pub async fn login_with_google(&self, id_token: &str) -> AuthResult<Session> {
        let grant = self.inner.api.login_with_google(id_token).await?;
        self.establish(grant).await
    }

    /// Refresh the stored token.
    ///
    /// Concurrent callers in this context share a single backend request
    /// and all receive its result.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` if no session is stored
    /// - `TokenExpired` if the stored session already expired (it is evicted)
    /// - `TokenRevoked` if the backend refused the token (the session is cleared)
    /// - `Network`, `Server` or `MalformedResponse` otherwise; nothing changes
    pub async fn refresh(&self) -> AuthResult<Session> {
        let flight = {
            let mut slot = self.inflight_slot();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.start_refresh();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Run an authenticated call under the session policy.
    ///
    /// `call` receives the bearer token to use. It is invoked at most twice:
    /// once, and once more after a refresh if the first attempt answered
    /// `Unauthorized`.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` if there is no unexpired session
    /// - `TokenRevoked` if the backend keeps rejecting the session (it is cleared)
    /// - whatever `call` returns otherwise
    pub async fn authorized<T, F, Fut>(&self, call: F) -> AuthResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let (session, phase) = self.current_session().await?;
        let user_id = session.user_id;
        let mut token = session.token;
        let mut refreshed = false;

        if phase == SessionPhase::NearExpiry {
            match self.refresh().await {
                Ok(next) if next.user_id != user_id => return Err(AuthError::NotAuthenticated),
                Ok(next) => {
                    token = next.token;
                    refreshed = true;
                }
                Err(AuthError::TokenExpired) | Err(AuthError::NotAuthenticated) => {
                    return Err(AuthError::NotAuthenticated)
                }
                Err(AuthError::TokenRevoked) => return Err(AuthError::TokenRevoked),
                Err(e) => {
                    tracing::warn!("Proactive refresh failed, using current token: {}", e);
                }
            }
        }

        match call(token.clone()).await {
            Err(AuthError::Unauthorized(_)) if !refreshed => {
                tracing::debug!("Request unauthorized, refreshing and retrying once");
                let next = match self.refresh().await {
                    Err(AuthError::TokenExpired) => return Err(AuthError::NotAuthenticated),
                    other => other?,
                };
                // The call began under this user; never retry it as someone else
                if next.user_id != user_id {
                    return Err(AuthError::NotAuthenticated);
                }
                match call(next.token.clone()).await {
                    Err(AuthError::Unauthorized(_)) => {
                        self.end_session_if_current(&next.token, SignOutReason::Revoked)
                            .await;
                        Err(AuthError::TokenRevoked)
                    }
                    other => other,
                }
            }
            Err(AuthError::Unauthorized(_)) => {
                self.end_session_if_current(&token, SignOutReason::Revoked).await;
                Err(AuthError::TokenRevoked)
            }
            other => other,
        }
    }

    /// Authenticated JSON call to any backend path
    pub async fn authorized_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> AuthResult<Value> {
        let api = self.inner.api.clone();
        self.authorized(|token| {
            let api = api.clone();
            let method = method.clone();
            let path = path.to_string();
            let body = body.clone();
            async move { api.call_json(method, &path, &token, body.as_ref()).await }
        })
        .await
    }

    /// Fetch the current user and update the cached profile.
    ///
    /// A `NotFound` (the account no longer exists) is returned without
    /// clearing the session.
    pub async fn refresh_profile(&self) -> AuthResult<UserProfile> {
        let api = self.inner.api.clone();
        let profile = self
            .authorized(|token| {
                let api = api.clone();
                async move { api.current_user(&token).await }
            })
            .await?;

        {
            let _guard = self.inner.write_lock.lock().await;
            let current = self
                .inner
                .store
                .read()
                .await
                .ok_or(AuthError::NotAuthenticated)?;
            let next = current.with_profile(profile.clone())?;
            self.inner.store.write(&next).await?;
        }

        tracing::debug!("Profile updated for user {}", profile.id);
        self.emit(AuthEvent::ProfileUpdated {
            profile: profile.clone(),
        });
        Ok(profile)
    }

    /// Sign out.
    ///
    /// Waits for any in-flight refresh so the newest token is the one
    /// revoked, then clears the store whatever the backend answered.
    pub async fn logout(&self) -> AuthResult<LogoutOutcome> {
        let pending = self.inflight_slot().clone();
        if let Some(flight) = pending {
            let _ = flight.await;
        }

        let _guard = self.inner.write_lock.lock().await;
        let server_revoked = match self.inner.store.read().await {
            None => true,
            Some(session) => match self.inner.api.logout(&session.token).await {
                Ok(()) => true,
                // The backend already considers the token invalid
                Err(AuthError::Unauthorized(_)) => true,
                Err(e) => {
                    tracing::warn!(
                        "Backend logout failed, token stays valid until it expires: {}",
                        e
                    );
                    false
                }
            },
        };

        self.inner.store.clear().await?;
        tracing::info!("Signed out");
        self.emit(AuthEvent::SignedOut {
            reason: SignOutReason::LoggedOut,
        });

        Ok(LogoutOutcome { server_revoked })
    }

    async fn establish(&self, grant: AuthGrant) -> AuthResult<Session> {
        let session = Session::from_token(grant.token, grant.user)?;
        {
            let _guard = self.inner.write_lock.lock().await;
            self.inner.store.write(&session).await?;
        }

        tracing::info!("User {} signed in", session.user_id);
        self.emit(AuthEvent::SignedIn {
            user_id: session.user_id,
            profile: session.user_profile.clone(),
        });
        Ok(session)
    }

    async fn run_refresh(&self) -> AuthResult<Session> {
        let current = self
            .inner
            .store
            .read()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        if current.is_expired(self.inner.clock.now()) {
            self.end_session_if_current(&current.token, SignOutReason::Expired)
                .await;
            return Err(AuthError::TokenExpired);
        }

        tracing::debug!("Refreshing token for user {}", current.user_id);
        let token = match self.inner.api.refresh(&current.token).await {
            Ok(token) => token,
            Err(AuthError::Unauthorized(_)) => {
                tracing::warn!("Backend refused refresh for user {}", current.user_id);
                self.end_session_if_current(&current.token, SignOutReason::Revoked)
                    .await;
                return Err(AuthError::TokenRevoked);
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                return Err(e);
            }
        };
        let next = current.with_refreshed_token(token)?;

        let _guard = self.inner.write_lock.lock().await;
        match self.inner.store.read().await {
            Some(stored) if stored.token == current.token => {
                self.inner.store.write(&next).await?;
            }
            // Refreshed by another context sharing the store
            Some(stored) if stored.user_id == current.user_id => return Ok(stored),
            // Signed out, or another account signed in, while the request was out
            _ => return Err(AuthError::NotAuthenticated),
        }

        tracing::info!("Token refreshed for user {}", next.user_id);
        self.emit(AuthEvent::Refreshed {
            user_id: next.user_id,
            expires_at: next.expires_at,
        });
        Ok(next)
    }

    /// Spawn a refresh flight.
    ///
    /// The flight runs on its own task and releases the in-flight slot when
    /// it finishes, so it completes even if every caller awaiting it is
    /// dropped.
    fn start_refresh(&self) -> RefreshFuture {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let _release = InflightRelease(manager.inner.clone());
            manager.run_refresh().await
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!("Refresh task failed: {}", e);
                Err(AuthError::Network(format!("refresh did not complete: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Read the stored session, evicting it if it has expired
    async fn current_session(&self) -> AuthResult<(Session, SessionPhase)> {
        let session = self
            .inner
            .store
            .read()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        let phase = session.phase(self.inner.clock.now(), self.inner.settings.refresh_threshold);
        if phase == SessionPhase::Expired {
            self.end_session_if_current(&session.token, SignOutReason::Expired)
                .await;
            return Err(AuthError::NotAuthenticated);
        }
        Ok((session, phase))
    }

    /// Clear the store if it still holds `token`.
    ///
    /// Returns whether anything was cleared.
    async fn end_session_if_current(&self, token: &str, reason: SignOutReason) -> bool {
        let _guard = self.inner.write_lock.lock().await;
        match self.inner.store.read().await {
            Some(stored) if stored.token == token => {}
            _ => return false,
        }

        if let Err(e) = self.inner.store.clear().await {
            tracing::error!("Failed to clear session: {}", e);
            return false;
        }

        tracing::info!("Session ended: {:?}", reason);
        self.emit(AuthEvent::SignedOut { reason });
        true
    }

    fn emit(&self, event: AuthEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::trace!("No surface subscribed to auth events");
        }
    }

    fn is_refreshing(&self) -> bool {
        self.inflight_slot().is_some()
    }

    fn inflight_slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshFuture>> {
        self.inner.inflight_slot()
    }
}

impl Inner {
    fn inflight_slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshFuture>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Empties the in-flight slot when the refresh task ends, panics included.
///
/// A new flight is only installed into an empty slot, so the slot still
/// holds this task's flight when the guard runs.
struct InflightRelease(Arc<Inner>);

impl Drop for InflightRelease {
    fn drop(&mut self) {
        self.0.inflight_slot().take();
    }
}
