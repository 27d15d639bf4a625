use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::config::ServerConfig;

pub const SESSION_COOKIE: &str = "session_id";
pub const STATE_COOKIE: &str = "oidc_state";

fn build(
    config: &ServerConfig,
    name: &'static str,
    value: String,
    same_site: SameSite,
    max_age: Duration,
) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(same_site)
        .max_age(max_age)
        .build();
    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

#[must_use]
pub fn session_cookie(config: &ServerConfig, session_id: String) -> Cookie<'static> {
    build(config, SESSION_COOKIE, session_id, SameSite::Strict, Duration::hours(24))
}

#[must_use]
pub fn state_cookie(config: &ServerConfig, state: String) -> Cookie<'static> {
    build(config, STATE_COOKIE, state, SameSite::Lax, Duration::minutes(10))
}

/// An expired cookie that makes the browser drop `name`.
#[must_use]
pub fn clear_cookie(config: &ServerConfig, name: &'static str) -> Cookie<'static> {
    let same_site = if name == SESSION_COOKIE {
        SameSite::Strict
    } else {
        SameSite::Lax
    };
    build(config, name, String::new(), same_site, Duration::ZERO)
}
