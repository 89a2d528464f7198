//! Session model and token grammar.
//!
//! Access tokens arrive as `"<provider>_<userId>_<timestampMs>_<base64Payload>"`
//! (at least four underscore-delimited segments; the payload is the
//! remainder, so URL-safe base64 containing `_` still parses). Parsing is
//! pure — the session *lifecycle* (mirroring, tamper detection, cache
//! clearing) belongs to the client crate's session manager.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::config::SessionPolicy;
use crate::error::AuthError;
use crate::identity::{EpochMs, UserId};

/// Keys under which session tokens are mirrored into the key-value store
/// for tamper detection.
pub mod mirror {
    pub const ACCESS_TOKEN_KEY: &str = "compass.session.access_token";
    pub const REFRESH_TOKEN_KEY: &str = "compass.session.refresh_token";
}

// ============================================================================
// TOKEN GRAMMAR
// ============================================================================

/// The structured content of a parsed access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub provider: String,
    pub user_id: UserId,
    pub issued_at_ms: EpochMs,
    /// Decoded payload bytes (provider-issued, opaque to Compass).
    pub payload: Vec<u8>,
}

impl ParsedToken {
    /// Parse and check an access token against the session policy.
    ///
    /// # Errors
    /// - `MalformedToken` on grammar violations (segment count, non-ASCII,
    ///   empty segments, unparsable timestamp, future-dated timestamp,
    ///   undecodable payload)
    /// - `UnknownProvider` when the prefix is not configured
    /// - `TokenExpired` when the embedded timestamp is older than the policy
    /// - `PayloadTooShort` when the decoded payload is implausibly small
    pub fn parse(token: &str, policy: &SessionPolicy, now_ms: EpochMs) -> Result<Self, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MalformedToken {
                reason: "empty token".to_string(),
            });
        }
        if !token.is_ascii() {
            return Err(AuthError::MalformedToken {
                reason: "token contains non-ASCII bytes".to_string(),
            });
        }

        let mut segments = token.splitn(4, '_');
        let (Some(provider), Some(user_id), Some(timestamp), Some(payload_b64)) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::MalformedToken {
                reason: "expected at least 4 underscore-delimited segments".to_string(),
            });
        };

        if provider.is_empty() || user_id.is_empty() {
            return Err(AuthError::MalformedToken {
                reason: "empty provider or user segment".to_string(),
            });
        }

        if !policy
            .allowed_providers
            .iter()
            .any(|allowed| allowed == provider)
        {
            return Err(AuthError::UnknownProvider {
                provider: provider.to_string(),
            });
        }

        let issued_at_ms: EpochMs = timestamp.parse().map_err(|_| AuthError::MalformedToken {
            reason: format!("unparsable timestamp segment: {}", timestamp),
        })?;
        if issued_at_ms <= 0 {
            return Err(AuthError::MalformedToken {
                reason: "timestamp must be a positive epoch-ms value".to_string(),
            });
        }

        let age_ms = now_ms - issued_at_ms;
        let max_age_ms = policy.max_token_age.as_millis() as i64;
        if age_ms > max_age_ms {
            return Err(AuthError::TokenExpired { age_ms, max_age_ms });
        }
        if age_ms < -(policy.future_skew.as_millis() as i64) {
            return Err(AuthError::MalformedToken {
                reason: "timestamp is in the future".to_string(),
            });
        }

        let payload = decode_payload(payload_b64)?;
        if payload.len() < policy.min_payload_bytes {
            return Err(AuthError::PayloadTooShort {
                decoded_len: payload.len(),
            });
        }

        Ok(Self {
            provider: provider.to_string(),
            user_id: user_id.to_string(),
            issued_at_ms,
            payload,
        })
    }

    /// Username embedded in the payload when it is JSON with a
    /// `username`/`login` field; falls back to the user id. The payload is
    /// provider-issued but still untrusted, so the value is sanitized.
    pub fn username(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.payload)
            .ok()
            .and_then(|v| {
                v.get("username")
                    .or_else(|| v.get("login"))
                    .and_then(|u| u.as_str())
                    .map(crate::sanitize::sanitize_string)
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.user_id.clone())
    }
}

/// Accept both standard (padded) and URL-safe (unpadded) base64.
fn decode_payload(payload_b64: &str) -> Result<Vec<u8>, AuthError> {
    STANDARD
        .decode(payload_b64)
        .or_else(|_| URL_SAFE_NO_PAD.decode(payload_b64))
        .map_err(|_| AuthError::MalformedToken {
            reason: "payload is not valid base64".to_string(),
        })
}

// ============================================================================
// SESSION
// ============================================================================

/// The active session. Replaced wholesale, never partially updated.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry derived from the timestamp embedded in the access
    /// token plus the policy's token lifetime.
    pub expires_at_ms: EpochMs,
    /// The provider's own credential, carried in the token payload.
    pub provider_token: String,
}

impl Session {
    /// Build a session from a parsed token and its raw source strings.
    pub fn from_token(
        parsed: &ParsedToken,
        access_token: &str,
        refresh_token: &str,
        policy: &SessionPolicy,
    ) -> Self {
        Self {
            user_id: parsed.user_id.clone(),
            username: parsed.username(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at_ms: parsed.issued_at_ms + policy.max_token_age.as_millis() as i64,
            provider_token: String::from_utf8_lossy(&parsed.payload).into_owned(),
        }
    }

    pub fn is_expired(&self, now_ms: EpochMs) -> bool {
        now_ms >= self.expires_at_ms
    }
}

impl fmt::Debug for Session {
    /// Tokens never reach logs; only their lengths do.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field(
                "access_token",
                &format!("[REDACTED, {} chars]", self.access_token.len()),
            )
            .field(
                "refresh_token",
                &format!("[REDACTED, {} chars]", self.refresh_token.len()),
            )
            .field("expires_at_ms", &self.expires_at_ms)
            .field(
                "provider_token",
                &format!("[REDACTED, {} chars]", self.provider_token.len()),
            )
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
