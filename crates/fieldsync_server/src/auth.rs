//! Device token authentication.
//!
//! Tokens bind an organization and a device together with an expiry using
//! HMAC-SHA256. The signed payload is three newline-separated fields:
//!
//! - organization id
//! - device id
//! - expiry (Unix millis, decimal)
//!
//! followed by the 32-byte signature, base64url-encoded for transport.
//! The organization a request acts on always comes from the token, never
//! from the request body.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

/// The identity a validated token asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Organization the device belongs to.
    pub org_id: String,
    /// The device itself.
    pub device_id: String,
}

/// Issues and validates device tokens.
#[derive(Clone)]
pub struct TokenValidator {
    secret: Vec<u8>,
    token_expiry: Duration,
}

impl TokenValidator {
    /// Creates a validator over a shared secret.
    pub fn new(secret: Vec<u8>, token_expiry: Duration) -> Self {
        Self {
            secret,
            token_expiry,
        }
    }

    /// Issues a token for a device of an organization.
    pub fn create_token(&self, org_id: &str, device_id: &str) -> ServerResult<String> {
        if org_id.contains('\n') || device_id.contains('\n') {
            return Err(ServerError::InvalidRequest(
                "identifiers must not contain newlines".into(),
            ));
        }
        let expiry = now_millis() + self.token_expiry.as_millis() as u64;
        let payload = format!("{org_id}\n{device_id}\n{expiry}");

        let mut token = payload.into_bytes();
        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validates a token and returns the identity it asserts.
    pub fn validate_token(&self, token: &str) -> ServerResult<TokenClaims> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;
        if raw.len() <= SIGNATURE_LEN {
            return Err(ServerError::AuthenticationFailed("token too short".into()));
        }
        let (payload, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);

        // Constant-time comparison via the MAC itself.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let payload = std::str::from_utf8(payload)
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;
        let mut fields = payload.splitn(3, '\n');
        let (org_id, device_id, expiry) = match (fields.next(), fields.next(), fields.next()) {
            (Some(org), Some(device), Some(expiry)) => (org, device, expiry),
            _ => {
                return Err(ServerError::AuthenticationFailed(
                    "malformed token payload".into(),
                ))
            }
        };
        let expiry: u64 = expiry
            .parse()
            .map_err(|_| ServerError::AuthenticationFailed("malformed token payload".into()))?;
        if now_millis() > expiry {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        Ok(TokenClaims {
            org_id: org_id.to_string(),
            device_id: device_id.to_string(),
        })
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(
            b"test-secret-key-32-bytes-long!!".to_vec(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token("org-1", "tablet-7").unwrap();

        let claims = validator.validate_token(&token).unwrap();
        assert_eq!(claims.org_id, "org-1");
        assert_eq!(claims.device_id, "tablet-7");
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token("org-1", "tablet-7").unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(raw);

        assert!(validator.validate_token(&tampered).is_err());
    }

    #[test]
    fn reject_wrong_secret() {
        let token = validator().create_token("org-1", "tablet-7").unwrap();
        let other = TokenValidator::new(b"another-secret".to_vec(), Duration::from_secs(3600));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(b"secret".to_vec(), Duration::from_secs(0));
        let token = validator.create_token("org-1", "tablet-7").unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let err = validator.validate_token(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn reject_garbage() {
        let validator = validator();
        assert!(validator.validate_token("not-a-token").is_err());
        assert!(validator.validate_token("").is_err());
    }

    #[test]
    fn org_cannot_smuggle_fields() {
        let validator = validator();
        assert!(validator.create_token("org\n1", "tablet").is_err());
    }
}
