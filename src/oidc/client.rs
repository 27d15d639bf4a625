use std::sync::RwLock;

use chrono::{TimeDelta, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;

use super::claims::{IdentityClaims, extract_claims};
use super::pkce::{CHALLENGE_METHOD, PkcePair};
use crate::auth::random_urlsafe;
use crate::config::OidcSettings;
use crate::error::{Error, Result};
use crate::session::ProviderToken;

const STATE_BYTES: usize = 32;

/// The subset of the discovery document the client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Where to send the browser, plus what to remember until the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    #[must_use]
    pub fn into_provider_token(self) -> ProviderToken {
        ProviderToken {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + TimeDelta::seconds(secs)),
        }
    }
}

/// Public OIDC client using the authorization code grant with PKCE.
pub struct OidcClient {
    settings: OidcSettings,
    metadata: ProviderMetadata,
    http: reqwest::Client,
    jwks: RwLock<Option<JwkSet>>,
}

impl OidcClient {
    /// Fetches the provider's discovery document. Every request this client
    /// makes is bounded by `settings.http_timeout`.
    pub async fn discover(settings: OidcSettings) -> Result<Self> {
        let http = http_client(&settings)?;
        let url = format!("{}/.well-known/openid-configuration", settings.issuer);

        let metadata: ProviderMetadata = http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Config(format!("oidc discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Config(format!("invalid discovery document: {e}")))?;

        if metadata.issuer.trim_end_matches('/') != settings.issuer {
            return Err(Error::Config(format!(
                "issuer mismatch: configured {}, provider reports {}",
                settings.issuer, metadata.issuer
            )));
        }

        tracing::info!(issuer = %metadata.issuer, "oidc provider discovered");
        Ok(Self::with_metadata(settings, metadata, http))
    }

    /// Builds a client from known metadata without contacting the provider.
    pub fn new(settings: OidcSettings, metadata: ProviderMetadata) -> Result<Self> {
        let http = http_client(&settings)?;
        Ok(Self::with_metadata(settings, metadata, http))
    }

    fn with_metadata(
        settings: OidcSettings,
        metadata: ProviderMetadata,
        http: reqwest::Client,
    ) -> Self {
        Self {
            settings,
            metadata,
            http,
            jwks: RwLock::new(None),
        }
    }

    /// Seeds the key cache, skipping the first JWKS fetch.
    #[must_use]
    pub fn with_jwks(self, jwks: JwkSet) -> Self {
        *self.jwks.write().unwrap_or_else(|e| e.into_inner()) = Some(jwks);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn build_authorization_request(&self) -> AuthorizationRequest {
        let state = random_urlsafe(STATE_BYTES);
        let pkce = PkcePair::generate();
        let scope = self.settings.scopes.join(" ");

        let params = [
            ("response_type", "code"),
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", CHALLENGE_METHOD),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let endpoint = &self.metadata.authorization_endpoint;
        let separator = if endpoint.contains('?') { '&' } else { '?' };

        AuthorizationRequest {
            url: format!("{endpoint}{separator}{query}"),
            state,
            pkce_verifier: pkce.verifier,
        }
    }

    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("code_verifier", pkce_verifier),
        ];

        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "token endpoint rejected code");
            return Err(Error::ExchangeFailed(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ExchangeFailed(format!("invalid token response: {e}")))
    }

    /// Checks signature, issuer, audience and expiry, then returns the raw
    /// claim set.
    pub async fn verify_id_token(&self, raw: &str) -> Result<Value> {
        let header = decode_header(raw).map_err(|e| Error::InvalidIdToken(e.to_string()))?;

        let key = match self.cached_key(header.kid.as_deref())? {
            Some(key) => key,
            None => {
                // unknown kid usually means the provider rotated keys
                self.refresh_jwks().await?;
                self.cached_key(header.kid.as_deref())?
                    .ok_or_else(|| Error::InvalidIdToken("no matching signing key".to_string()))?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.metadata.issuer]);
        validation.set_audience(&[&self.settings.client_id]);

        decode::<Value>(raw, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::InvalidIdToken(e.to_string()))
    }

    pub fn extract_claims(&self, claims: &Value) -> Result<IdentityClaims> {
        extract_claims(claims, &self.settings.groups_claim)
    }

    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<Value> {
        let endpoint = self
            .metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| Error::ExchangeFailed("provider has no userinfo endpoint".to_string()))?;

        self.http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::ExchangeFailed(format!("userinfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::ExchangeFailed(format!("invalid userinfo response: {e}")))
    }

    fn cached_key(&self, kid: Option<&str>) -> Result<Option<DecodingKey>> {
        let guard = self.jwks.read().unwrap_or_else(|e| e.into_inner());
        let Some(jwks) = guard.as_ref() else {
            return Ok(None);
        };

        let jwk = match kid {
            Some(kid) => jwks.find(kid),
            None if jwks.keys.len() == 1 => jwks.keys.first(),
            None => None,
        };

        jwk.map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| Error::InvalidIdToken(format!("unusable signing key: {e}")))
    }

    async fn refresh_jwks(&self) -> Result<()> {
        let jwks: JwkSet = self
            .http
            .get(&self.metadata.jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::InvalidIdToken(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::InvalidIdToken(format!("invalid jwks: {e}")))?;

        *self.jwks.write().unwrap_or_else(|e| e.into_inner()) = Some(jwks);
        Ok(())
    }
}

fn http_client(settings: &OidcSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build http client: {e}")))
}
