//! Bearer token claims
//!
//! Decode-only access to the payload of a three-part compact token
//! (`header.payload.signature`).
//!
//! # Trust boundary
//!
//! Nothing in this module verifies a signature. The claims returned here are
//! whatever the token says about itself; they are used only to schedule
//! refreshes and to key the local session. Whether a token is valid is
//! decided exclusively by the backend, and a 401 from the backend overrides
//! anything read here.

use chrono::{DateTime, TimeZone, Utc};
use data_encoding::BASE64URL_NOPAD;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AuthError;

/// Claims the session core reads from a token payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject: the authenticated user's id
    pub sub: i64,
    /// Absolute expiry instant
    pub exp: DateTime<Utc>,
    /// Revocation-tracking identifier
    pub jti: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(deserialize_with = "deserialize_subject")]
    sub: i64,
    exp: i64,
    #[serde(default)]
    jti: Option<String>,
}

/// Accepts the subject either as a JSON number or as a numeric string
fn deserialize_subject<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom("subject is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| de::Error::custom(format!("subject '{}' is not numeric", s))),
        other => Err(de::Error::custom(format!("unexpected subject type: {}", other))),
    }
}

/// Decode the payload segment of a token into raw JSON without any checks
/// on its content.
///
/// # Errors
///
/// Returns `AuthError::MalformedToken` if the token does not have three
/// non-empty dot-separated segments, or if the middle one is not base64url
/// encoded JSON.
pub fn decode_untrusted_payload(token: &str) -> Result<Value, AuthError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = BASE64URL_NOPAD
        .decode(payload.as_bytes())
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {}", e)))
}

/// Read `sub`, `exp` and `jti` from a token without verifying it.
///
/// # Errors
///
/// Returns `AuthError::MalformedToken` if the payload cannot be decoded, if
/// `sub` or `exp` is missing, or if `exp` is out of range.
pub fn decode_claims(token: &str) -> Result<TokenClaims, AuthError> {
    let payload = decode_untrusted_payload(token)?;
    let raw: RawClaims = serde_json::from_value(payload)
        .map_err(|e| AuthError::MalformedToken(format!("invalid claims: {}", e)))?;

    let exp = Utc
        .timestamp_opt(raw.exp, 0)
        .single()
        .ok_or_else(|| AuthError::MalformedToken(format!("exp {} out of range", raw.exp)))?;

    Ok(TokenClaims {
        sub: raw.sub,
        exp,
        jti: raw.jti,
    })
}

/// Encode a JSON payload into an unsigned compact token.
///
/// Only used to fabricate tokens in tests; the signature segment is a fixed
/// placeholder.
#[cfg(test)]
pub(crate) fn encode_unsigned(payload: &Value) -> String {
    let header = BASE64URL_NOPAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = BASE64URL_NOPAD.encode(payload.to_string().as_bytes());
    format!("{}.{}.c2lnbmF0dXJl", header, body)
}
