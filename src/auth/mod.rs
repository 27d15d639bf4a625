mod helpers;
mod middleware;
mod resolver;
mod token;

pub use helpers::{
    Credentials, extract_token_from_header, token_from_query, token_from_urlencoded,
};
pub use middleware::{
    AuthError, AuthOutcome, MAX_FORM_BYTES, OptionalAuth, RequireAdmin, RequireAuth,
    authenticate, resolve_auth,
};
pub use resolver::{
    AuthMethod, DEFAULT_CHAIN, LegacyUserTokenResolver, Principal, PrincipalResolver,
    ProjectTokenResolver, ResolveContext, SessionCookieResolver, UserTokenResolver,
    resolve_principal, resolve_with,
};
pub use token::{TokenKind, generate_token, random_urlsafe, token_kind};
