//! OpenID Connect login for a public client: discovery, PKCE authorization
//! requests, code exchange, and ID token verification.

mod claims;
mod client;
mod pkce;

pub use claims::{IdentityClaims, extract_claims, normalize_groups};
pub use client::{AuthorizationRequest, OidcClient, ProviderMetadata, TokenResponse};
pub use pkce::{CHALLENGE_METHOD, PkcePair, challenge_for};
