use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart, Request, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use super::helpers::{
    Credentials, extract_token_from_header, token_from_query, token_from_urlencoded,
};
use super::resolver::{Principal, ResolveContext, resolve_principal};
use crate::server::AppState;
use crate::server::cookies::SESSION_COOKIE;

/// Largest form body buffered while looking for a `token` field.
pub const MAX_FORM_BYTES: usize = 64 * 1024 * 1024;

/// Extractor that requires any valid authentication
pub struct RequireAuth(pub Principal);

/// Extractor that requires an admin principal
pub struct RequireAdmin(pub Principal);

/// Extractor for routes that work with or without a principal. Missing and
/// unknown credentials both yield `None`.
pub struct OptionalAuth(pub Option<Principal>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingAuth,
    InvalidToken,
    NotAdmin,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"coverhub\""),
            );
        }

        response
    }
}

/// Result of running the resolver chain for one request. Inserted into the
/// request extensions by [`resolve_auth`].
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(Principal),
    /// No credentials were presented.
    Anonymous,
    Rejected(AuthError),
}

impl AuthOutcome {
    fn required(self) -> Result<Principal, AuthError> {
        match self {
            AuthOutcome::Authenticated(principal) => Ok(principal),
            AuthOutcome::Anonymous => Err(AuthError::MissingAuth),
            AuthOutcome::Rejected(e) => Err(e),
        }
    }

    fn optional(self) -> Result<Option<Principal>, AuthError> {
        match self {
            AuthOutcome::Authenticated(principal) => Ok(Some(principal)),
            AuthOutcome::Rejected(AuthError::InternalError) => Err(AuthError::InternalError),
            AuthOutcome::Anonymous | AuthOutcome::Rejected(_) => Ok(None),
        }
    }
}

/// Resolves the acting principal from the session cookie or a
/// header/query/form token.
pub fn authenticate(state: &AppState, creds: &Credentials) -> AuthOutcome {
    if creds.is_empty() {
        return AuthOutcome::Anonymous;
    }

    let ctx = ResolveContext {
        store: state.store.as_ref(),
        sessions: &state.sessions,
    };

    match resolve_principal(creds, &ctx) {
        Ok(Some(principal)) => AuthOutcome::Authenticated(principal),
        Ok(None) => AuthOutcome::Rejected(AuthError::InvalidToken),
        Err(e) => {
            tracing::error!("Failed to resolve credentials: {e}");
            AuthOutcome::Rejected(AuthError::InternalError)
        }
    }
}

fn credentials_from_parts(headers: &HeaderMap, query: Option<&str>) -> Credentials {
    let jar = CookieJar::from_headers(headers);
    let header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());

    Credentials {
        session_id: jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty()),
        token: extract_token_from_header(header).or_else(|| token_from_query(query)),
    }
}

#[derive(Clone, Copy)]
enum FormKind {
    UrlEncoded,
    Multipart,
}

fn form_kind(headers: &HeaderMap) -> Option<FormKind> {
    let ct = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())?
        .to_ascii_lowercase();
    if ct.starts_with("application/x-www-form-urlencoded") {
        Some(FormKind::UrlEncoded)
    } else if ct.starts_with("multipart/form-data") {
        Some(FormKind::Multipart)
    } else {
        None
    }
}

/// Reads the `token` field from a buffered multipart body.
async fn token_from_multipart(headers: &HeaderMap, bytes: Bytes) -> Option<String> {
    let mut form = Request::new(Body::from(bytes));
    *form.headers_mut() = headers.clone();
    let mut multipart = Multipart::from_request(form, &()).await.ok()?;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("token") {
            let value = field.text().await.ok()?;
            let value = value.trim();
            return (!value.is_empty()).then(|| value.to_string());
        }
    }
    None
}

/// Middleware that authenticates the request once and leaves an
/// [`AuthOutcome`] for the extractors. A `token` field in a urlencoded or
/// multipart form is read by buffering the body, which is then handed on
/// unchanged.
pub async fn resolve_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let mut creds = credentials_from_parts(request.headers(), request.uri().query());

    let mut request = match form_kind(request.headers()) {
        Some(kind) if creds.token.is_none() => {
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    let body = json!({ "data": null, "error": "Request body too large" });
                    return (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response();
                }
            };
            creds.token = match kind {
                FormKind::UrlEncoded => token_from_urlencoded(&bytes),
                FormKind::Multipart => token_from_multipart(&parts.headers, bytes.clone()).await,
            };
            Request::from_parts(parts, Body::from(bytes))
        }
        _ => request,
    };

    let outcome = authenticate(&state, &creds);
    request.extensions_mut().insert(outcome);
    next.run(request).await
}

fn outcome(parts: &Parts, state: &AppState) -> AuthOutcome {
    if let Some(outcome) = parts.extensions.get::<AuthOutcome>() {
        return outcome.clone();
    }
    let creds = credentials_from_parts(&parts.headers, parts.uri.query());
    authenticate(state, &creds)
}

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        outcome(parts, state).required().map(RequireAuth)
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = outcome(parts, state).required()?;

        if !principal.is_admin() {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        outcome(parts, state).optional().map(OptionalAuth)
    }
}
