// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Identity Resolution
//!
//! Verifies the signed credential attached to an inbound connection and
//! produces the authenticated identity behind it. The credential is a JWT
//! (HS256, shared secret) minted by the login/registration endpoints and
//! carried as a `token` cookie on both the HTTP API and the WebSocket
//! handshake.
//!
//! Verification checks signature and expiry only; it does not re-check that
//! the referenced user still exists. Every failure is a classified
//! [`AuthError`] — a missing or garbage token must never take the listener
//! down.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// An authenticated user principal. Immutable once derived from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque unique user id.
    pub id: String,
    /// Display name shown to other users.
    pub username: String,
}

/// Classified credential failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was attached to the request.
    #[error("no credential attached")]
    Missing,
    /// The credential was present but did not verify (bad signature,
    /// expired, or malformed).
    #[error("credential rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by the credential token.
///
/// Deliberately limited to the user id and display name; the token is a
/// bearer credential and must not carry secrets.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    iat: u64,
    exp: u64,
}

/// Mints and verifies credential tokens against a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenVerifier {
    /// Creates a verifier from the shared secret.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        TokenVerifier {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issues a signed token for an identity.
    pub fn issue(&self, identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
        let now = unix_now_secs();
        let claims = Claims {
            sub: identity.id.clone(),
            username: identity.username.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Resolves an identity from a raw token, if one was attached.
    ///
    /// `None` maps to [`AuthError::Missing`]; callers decide whether that
    /// means "refuse" or "treat as anonymous".
    pub fn resolve(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::Missing)?;
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(Identity {
            id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

/// Extracts the `token` cookie value from a raw `Cookie` header.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|v| !v.is_empty())
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new("test-secret", Duration::from_secs(3600))
    }

    fn alice() -> Identity {
        Identity {
            id: "user-alice".to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_issue_and_resolve_round_trip() {
        let verifier = verifier();
        let token = verifier.issue(&alice()).unwrap();

        let identity = verifier.resolve(Some(&token)).unwrap();
        assert_eq!(identity, alice());
    }

    #[test]
    fn test_missing_token_is_classified() {
        let err = verifier().resolve(None).unwrap_err();
        assert!(matches!(err, AuthError::Missing));
    }

    #[test]
    fn test_garbage_token_is_classified() {
        let err = verifier().resolve(Some("not-a-token")).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = verifier().issue(&alice()).unwrap();
        let other = TokenVerifier::new("different-secret", Duration::from_secs(3600));
        assert!(matches!(
            other.resolve(Some(&token)),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Hand-craft a token whose exp is far enough in the past to clear
        // the default validation leeway.
        let now = unix_now_secs();
        let claims = Claims {
            sub: "user-alice".to_string(),
            username: "alice".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let err = verifier().resolve(Some(&token)).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_token_from_cookie_header() {
        assert_eq!(
            token_from_cookie_header("token=abc.def.ghi"),
            Some("abc.def.ghi")
        );
        assert_eq!(
            token_from_cookie_header("theme=dark; token=abc; lang=en"),
            Some("abc")
        );
        assert_eq!(token_from_cookie_header("theme=dark"), None);
        assert_eq!(token_from_cookie_header("token="), None);
        assert_eq!(token_from_cookie_header(""), None);
    }

    #[test]
    fn test_claims_do_not_leak_secrets() {
        // The middle JWT segment is the base64url claims object; it must
        // contain only id, username and timestamps.
        let token = verifier().issue(&alice()).unwrap();
        let payload = token.split('.').nth(1).unwrap();

        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        let decoded = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();

        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys.len(), 4);
        for key in ["sub", "username", "iat", "exp"] {
            assert!(keys.contains(&key));
        }
    }
}
