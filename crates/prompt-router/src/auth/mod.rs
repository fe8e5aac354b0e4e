//! Bearer token authentication.
//!
//! - [`jwks`] - cached signing-key ring
//! - [`jwt`] - RS256 token verification
//! - [`claims`] - verified claims

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::Claims;
pub use jwks::{KeyRing, KeySource};
pub use jwt::JwtVerifier;

/// Expected `iss` for tokens minted by the user pool `pool_id`.
pub fn issuer_for(idp_base_url: &str, pool_id: &str) -> String {
    format!("{}/{}", idp_base_url.trim_end_matches('/'), pool_id)
}
