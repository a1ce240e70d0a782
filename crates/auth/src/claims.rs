use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopfront_core::UserId;

/// JWT claims model (transport-agnostic).
///
/// This is the minimal set of claims the shop expects once a token has been
/// decoded/verified by the signature layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only. Signature verification / decoding
/// lives in [`crate::jwt`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued_offset_min: i64, expires_offset_min: i64, now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            issued_at: now + Duration::minutes(issued_offset_min),
            expires_at: now + Duration::minutes(expires_offset_min),
        }
    }

    #[test]
    fn current_claims_are_valid() {
        let now = Utc::now();
        assert_eq!(validate_claims(&claims(-5, 30, now), now), Ok(()));
    }

    #[test]
    fn expired_claims_are_rejected() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(-60, -5, now), now),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn future_claims_are_rejected() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(5, 30, now), now),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn inverted_time_window_is_rejected() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(30, 5, now), now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
