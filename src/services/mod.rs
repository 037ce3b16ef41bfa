//! Services layer - Authentication and session logic
//!
//! This module contains the session core's services:
//! - Credential acquirer (HTTP calls to the auth backend)
//! - Session store (persisted session state)
//! - Session manager (lifecycle, refresh policy, events)

pub mod auth_client;
pub mod clock;
pub mod session_manager;
pub mod session_store;

pub use auth_client::{AuthApi, AuthGrant, HttpAuthClient, RegisterInput};
pub use clock::{Clock, SystemClock};
pub use session_manager::{
    AuthEvent, AuthSnapshot, LogoutOutcome, SessionManager, SessionSettings, SessionState,
    SignOutReason,
};
pub use session_store::SessionStore;
