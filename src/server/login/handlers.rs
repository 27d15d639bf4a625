use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use super::provision::provision_user;
use crate::auth::{AuthMethod, OptionalAuth, Principal, RequireAuth};
use crate::error::{Error, Result};
use crate::oidc::{OidcClient, normalize_groups};
use crate::server::AppState;
use crate::server::cookies::{
    SESSION_COOKIE, STATE_COOKIE, clear_cookie, session_cookie, state_cookie,
};
use crate::server::dto::{
    AuthConfigResponse, CallbackParams, GroupsResponse, MeResponse, RefreshResponse,
};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

fn oidc(state: &AppState) -> Result<&Arc<OidcClient>> {
    state.oidc.as_ref().ok_or(Error::OidcDisabled)
}

fn require_session(principal: &Principal) -> std::result::Result<&str, ApiError> {
    match (principal.method, principal.session_id.as_deref()) {
        (AuthMethod::Session, Some(id)) => Ok(id),
        _ => Err(ApiError::unauthorized("Session required")),
    }
}

/// Starts the authorization code flow.
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let client = oidc(&state)?;
    let request = client.build_authorization_request();

    state
        .sessions
        .store_state(&request.state, &request.pkce_verifier);

    let jar = jar.add(state_cookie(&state.config, request.state));
    Ok::<_, ApiError>((jar, Redirect::to(&request.url)))
}

/// Completes the login: checks the state, exchanges the code, verifies the
/// ID token, and starts a session.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    let cookie_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.add(clear_cookie(&state.config, STATE_COOKIE));

    match complete_login(&state, cookie_state, params).await {
        Ok(session_id) => {
            let target = state.config.frontend_url.as_deref().unwrap_or("/").to_string();
            let jar = jar.add(session_cookie(&state.config, session_id));
            Ok((jar, Redirect::to(&target)))
        }
        Err(e) => Err((jar, e)),
    }
}

async fn complete_login(
    state: &AppState,
    cookie_state: Option<String>,
    params: CallbackParams,
) -> std::result::Result<String, ApiError> {
    let client = oidc(state)?;

    if let Some(error) = params.error {
        tracing::warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "provider returned an error"
        );
        return Err(ApiError::bad_request("Login was not completed"));
    }

    let query_state = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing state"))?;
    if cookie_state.as_deref() != Some(query_state.as_str()) {
        return Err(ApiError::bad_request("State mismatch"));
    }

    let verifier = state
        .sessions
        .take_state(&query_state)
        .map_err(|_| ApiError::bad_request("Invalid or expired state"))?;

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let tokens = client.exchange_code(&code, &verifier).await?;
    let raw_id_token = tokens
        .id_token
        .as_deref()
        .ok_or_else(|| Error::InvalidIdToken("token response has no id_token".to_string()))?;
    let claims = client.verify_id_token(raw_id_token).await?;
    let identity = client.extract_claims(&claims)?;

    let user = provision_user(state.store.as_ref(), &state.config, &identity)?;
    let session_id = state
        .sessions
        .create_session(user.id, tokens.into_provider_token());

    tracing::info!(user_id = user.id, "user logged in");
    Ok(session_id)
}

pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.delete_session(cookie.value());
    }
    let jar = jar.add(clear_cookie(&state.config, SESSION_COOKIE));
    (jar, Json(ApiResponse::success(json!({ "message": "Logged out" }))))
}

pub async fn me(RequireAuth(principal): RequireAuth) -> impl IntoResponse {
    Json(ApiResponse::success(MeResponse::from(principal)))
}

/// Public login configuration. Credentials are optional here and only
/// decide the `authenticated` flag.
pub async fn auth_config(
    OptionalAuth(principal): OptionalAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let settings = state.oidc.as_ref().map(|c| c.settings());
    Json(ApiResponse::success(AuthConfigResponse {
        oidc_enabled: settings.is_some(),
        authenticated: principal.is_some(),
        issuer: settings.map(|s| s.issuer.clone()),
        client_id: settings.map(|s| s.client_id.clone()),
        redirect_url: settings.map(|s| s.redirect_url.clone()),
    }))
}

pub async fn refresh(RequireAuth(principal): RequireAuth) -> impl IntoResponse {
    require_session(&principal)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(RefreshResponse {
        user: principal.user,
        session_valid: true,
    })))
}

pub async fn groups(RequireAuth(principal): RequireAuth) -> impl IntoResponse {
    Json(ApiResponse::success(GroupsResponse {
        groups: principal.user.groups,
    }))
}

/// Re-reads the groups claim from the provider's userinfo endpoint with the
/// access token held in the session.
pub async fn refresh_groups(
    State(state): State<Arc<AppState>>,
    RequireAuth(principal): RequireAuth,
) -> impl IntoResponse {
    let session_id = require_session(&principal)?;
    let client = oidc(&state)?;

    let session = state.sessions.get_session(session_id)?;
    let userinfo = client
        .fetch_userinfo(&session.provider_token.access_token)
        .await?;
    let groups = normalize_groups(userinfo.get(&client.settings().groups_claim));

    state
        .store
        .set_user_groups(principal.user.id, &groups)
        .api_err("Failed to update groups")?;

    tracing::info!(user_id = principal.user.id, count = groups.len(), "groups refreshed");
    Ok::<_, ApiError>(Json(ApiResponse::success(GroupsResponse { groups })))
}
