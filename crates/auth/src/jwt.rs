//! HS256 token decoding/issuing on top of the claims model.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopfront_core::UserId;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Validates a bearer token into claims.
///
/// Kept as a trait so the HTTP layer can be tested with a stub and so a
/// different signature scheme can be swapped in without touching handlers.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// On-the-wire claim layout (RFC 7519 numeric dates).
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: Uuid,
    iat: i64,
    exp: i64,
}

/// HS256 validator with a shared secret.
///
/// Time-window checks are done by [`validate_claims`] against the caller's
/// clock, not by the decoder, so validation stays deterministic in tests.
pub struct Hs256JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
        }
    }

    /// Issue a token for a user (dev/test helper; production tokens come
    /// from the identity collaborator).
    pub fn issue(
        &self,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenValidationError> {
        let claims = WireClaims {
            sub: *user_id.as_uuid(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Claim-window checks happen below via validate_claims.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<WireClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;

        let issued_at = Utc
            .timestamp_opt(data.claims.iat, 0)
            .single()
            .ok_or_else(|| TokenValidationError::Malformed("iat out of range".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| TokenValidationError::Malformed("exp out of range".to_string()))?;

        let claims = JwtClaims {
            sub: UserId::from_uuid(data.claims.sub),
            issued_at,
            expires_at,
        };
        validate_claims(&claims, now)?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        let validator = Hs256JwtValidator::new(b"test-secret".to_vec());
        let user_id = UserId::new();
        let now = Utc::now();

        let token = validator.issue(user_id, now, Duration::hours(1)).unwrap();
        let claims = validator.validate(&token, now).unwrap();

        assert_eq!(claims.sub, user_id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = Hs256JwtValidator::new(b"test-secret".to_vec());
        let now = Utc::now();

        let token = validator
            .issue(UserId::new(), now - Duration::hours(2), Duration::hours(1))
            .unwrap();
        let err = validator.validate(&token, now).unwrap_err();

        assert_eq!(err, TokenValidationError::Expired);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = Hs256JwtValidator::new(b"secret-a".to_vec());
        let verifier = Hs256JwtValidator::new(b"secret-b".to_vec());
        let now = Utc::now();

        let token = issuer.issue(UserId::new(), now, Duration::hours(1)).unwrap();
        let err = verifier.validate(&token, now).unwrap_err();

        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let validator = Hs256JwtValidator::new(b"test-secret".to_vec());
        let err = validator.validate("not-a-token", Utc::now()).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }
}
