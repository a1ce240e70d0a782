//! `shopfront-auth` — authentication boundary (identity only).
//!
//! This crate is intentionally decoupled from HTTP and storage. The shop
//! treats identity as an opaque authenticated user reference; everything
//! here exists to turn a bearer token into a `UserId` and nothing more.

pub mod claims;
pub mod jwt;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
