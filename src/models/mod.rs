//! Data models
//!
//! This module contains the data structures shared by the session core:
//! - Token claims (decode-only view of a bearer token)
//! - The cached user profile
//! - The session record

mod session;
pub mod token;
mod user;

pub use session::{Session, SessionPhase};
pub use token::{decode_claims, TokenClaims};
pub use user::UserProfile;
