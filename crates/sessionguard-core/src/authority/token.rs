//! Token text format: `base64(header).base64(payload).marker`.
//!
//! The marker is an integrity checksum over the first two segments, not a
//! signature. Anyone can mint a token that passes `decode`; the authority only
//! guarantees that a token was not altered in transit.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Algorithm tag written into every header
pub const ALGORITHM: &str = "HS256";

const TOKEN_TYPE: &str = "JWT";
const MARKER_PREFIX: &str = "mock_sig_";
const MARKER_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must have three segments, found {0}")]
    SegmentCount(usize),

    #[error("token segment is not valid base64")]
    Encoding,

    #[error("token segment is not valid JSON: {0}")]
    Json(String),

    #[error("token integrity marker does not match")]
    Integrity,

    #[error("unsupported token algorithm: {0}")]
    Algorithm(String),

    #[error("expected a {0} token")]
    WrongKind(TokenKind),

    #[error("token expired at {0}")]
    Expired(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

/// Payload carried in the second segment. `exp` and `iat` are epoch
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "email")]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub kind: TokenKind,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub jti: String,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.exp).single()
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.exp <= now_ms
    }
}

fn marker(signing_input: &str) -> String {
    let digest = Sha256::digest(signing_input.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(MARKER_LEN);
    format!("{}{}", MARKER_PREFIX, encoded)
}

/// Encode claims into token text.
pub fn encode(claims: &Claims) -> String {
    let header = serde_json::json!({ "alg": ALGORITHM, "typ": TOKEN_TYPE });
    let mut payload = serde_json::json!({
        "sub": claims.sub,
        "kind": claims.kind,
        "iat": claims.iat,
        "exp": claims.exp,
        "jti": claims.jti,
    });
    if let Some(ref role) = claims.role {
        payload["role"] = serde_json::Value::String(role.clone());
    }

    let signing_input = format!(
        "{}.{}",
        STANDARD.encode(header.to_string()),
        STANDARD.encode(payload.to_string())
    );
    let marker = marker(&signing_input);
    format!("{}.{}", signing_input, marker)
}

/// Decode token text and check its integrity marker. Expiry is not checked.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::SegmentCount(segments.len()));
    }

    let header_bytes = STANDARD.decode(segments[0]).map_err(|_| TokenError::Encoding)?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|e| TokenError::Json(e.to_string()))?;
    if header.alg != ALGORITHM {
        return Err(TokenError::Algorithm(header.alg));
    }

    let payload_bytes = STANDARD.decode(segments[1]).map_err(|_| TokenError::Encoding)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|e| TokenError::Json(e.to_string()))?;

    let signing_input = format!("{}.{}", segments[0], segments[1]);
    if segments[2] != marker(&signing_input) {
        return Err(TokenError::Integrity);
    }

    Ok(claims)
}

/// Decode, then require the given kind and an expiry after `now_ms`.
pub fn verify(token: &str, kind: TokenKind, now_ms: i64) -> Result<Claims, TokenError> {
    let claims = decode(token)?;
    if claims.kind != kind {
        return Err(TokenError::WrongKind(kind));
    }
    if claims.is_expired_at(now_ms) {
        return Err(TokenError::Expired(claims.exp));
    }
    Ok(claims)
}
