use serde::Serialize;

use super::helpers::Credentials;
use super::token::{TokenKind, token_kind};
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::store::Store;
use crate::types::{Project, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    UserToken,
    ProjectToken,
    LegacyToken,
}

/// The acting identity of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    /// Set when a project token authenticated the request.
    pub project: Option<Project>,
    pub method: AuthMethod,
    pub session_id: Option<String>,
}

impl Principal {
    fn new(user: User, method: AuthMethod) -> Self {
        Self {
            user,
            project: None,
            method,
            session_id: None,
        }
    }

    /// Project-scoped principals never carry their owner's admin rights.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.project.is_none() && self.user.admin
    }

    /// True if this principal may act on `project` as its owner.
    #[must_use]
    pub fn can_manage(&self, project: &Project) -> bool {
        if self.is_admin() {
            return true;
        }
        match &self.project {
            Some(scope) => scope.id == project.id,
            None => project.user_id == self.user.id,
        }
    }
}

/// What the resolver chain needs to look things up.
pub struct ResolveContext<'a> {
    pub store: &'a dyn Store,
    pub sessions: &'a SessionStore,
}

/// One way of turning credentials into a principal. `Ok(None)` means
/// "not mine", and the next resolver in the chain gets a turn.
pub trait PrincipalResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, creds: &Credentials, ctx: &ResolveContext<'_>) -> Result<Option<Principal>>;
}

pub struct SessionCookieResolver;
pub struct UserTokenResolver;
pub struct ProjectTokenResolver;
pub struct LegacyUserTokenResolver;

/// Resolution order: session cookie, then the token as a user token, a
/// project token, and finally a legacy inline user token.
pub static DEFAULT_CHAIN: [&dyn PrincipalResolver; 4] = [
    &SessionCookieResolver,
    &UserTokenResolver,
    &ProjectTokenResolver,
    &LegacyUserTokenResolver,
];

/// Runs `chain` in order and returns the first match.
pub fn resolve_with(
    chain: &[&dyn PrincipalResolver],
    creds: &Credentials,
    ctx: &ResolveContext<'_>,
) -> Result<Option<Principal>> {
    for resolver in chain {
        if let Some(principal) = resolver.resolve(creds, ctx)? {
            tracing::debug!(
                resolver = resolver.name(),
                user_id = principal.user.id,
                "request authenticated"
            );
            return Ok(Some(principal));
        }
    }
    Ok(None)
}

pub fn resolve_principal(
    creds: &Credentials,
    ctx: &ResolveContext<'_>,
) -> Result<Option<Principal>> {
    resolve_with(&DEFAULT_CHAIN, creds, ctx)
}

/// A prefixed token of another kind cannot match this resolver.
fn claims_other_kind(token: &str, kind: TokenKind) -> bool {
    token_kind(token).is_some_and(|k| k != kind)
}

impl PrincipalResolver for SessionCookieResolver {
    fn name(&self) -> &'static str {
        "session"
    }

    fn resolve(&self, creds: &Credentials, ctx: &ResolveContext<'_>) -> Result<Option<Principal>> {
        let Some(session_id) = creds.session_id.as_deref() else {
            return Ok(None);
        };

        let session = match ctx.sessions.get_session(session_id) {
            Ok(session) => session,
            Err(Error::NotFound | Error::Expired) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(ctx.store.get_user(session.user_id)?.map(|user| Principal {
            session_id: Some(session.id),
            ..Principal::new(user, AuthMethod::Session)
        }))
    }
}

impl PrincipalResolver for UserTokenResolver {
    fn name(&self) -> &'static str {
        "user_token"
    }

    fn resolve(&self, creds: &Credentials, ctx: &ResolveContext<'_>) -> Result<Option<Principal>> {
        let Some(raw) = creds.token.as_deref() else {
            return Ok(None);
        };
        if claims_other_kind(raw, TokenKind::User) {
            return Ok(None);
        }

        let Some(token) = ctx.store.get_user_token_by_token(raw)? else {
            return Ok(None);
        };
        let Some(user) = ctx.store.get_user(token.user_id)? else {
            return Ok(None);
        };

        if let Err(e) = ctx.store.touch_user_token(token.id) {
            tracing::warn!("Failed to update user token last_used_at: {e}");
        }

        Ok(Some(Principal::new(user, AuthMethod::UserToken)))
    }
}

impl PrincipalResolver for ProjectTokenResolver {
    fn name(&self) -> &'static str {
        "project_token"
    }

    fn resolve(&self, creds: &Credentials, ctx: &ResolveContext<'_>) -> Result<Option<Principal>> {
        let Some(raw) = creds.token.as_deref() else {
            return Ok(None);
        };
        if claims_other_kind(raw, TokenKind::Project) {
            return Ok(None);
        }

        let Some(token) = ctx.store.get_project_token_by_token(raw)? else {
            return Ok(None);
        };
        let Some(project) = ctx.store.get_project(&token.project_id)? else {
            return Ok(None);
        };
        let Some(user) = ctx.store.get_user(project.user_id)? else {
            return Ok(None);
        };

        if let Err(e) = ctx.store.touch_project_token(token.id) {
            tracing::warn!("Failed to update project token last_used_at: {e}");
        }

        Ok(Some(Principal {
            project: Some(project),
            ..Principal::new(user, AuthMethod::ProjectToken)
        }))
    }
}

impl PrincipalResolver for LegacyUserTokenResolver {
    fn name(&self) -> &'static str {
        "legacy_token"
    }

    fn resolve(&self, creds: &Credentials, ctx: &ResolveContext<'_>) -> Result<Option<Principal>> {
        let Some(raw) = creds.token.as_deref() else {
            return Ok(None);
        };
        if claims_other_kind(raw, TokenKind::Legacy) {
            return Ok(None);
        }

        Ok(ctx
            .store
            .get_user_by_token(raw)?
            .map(|user| Principal::new(user, AuthMethod::LegacyToken)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ProviderToken;
    use crate::store::SqliteStore;
    use crate::types::NewUser;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: SqliteStore,
        sessions: SessionStore,
        alice: User,
        bob: User,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
            store.initialize().unwrap();

            let alice = store
                .create_user(&NewUser {
                    email: "alice@example.com".to_string(),
                    token: Some("legacy-alice".to_string()),
                    ..Default::default()
                })
                .unwrap();
            let bob = store
                .create_user(&NewUser {
                    email: "bob@example.com".to_string(),
                    ..Default::default()
                })
                .unwrap();

            store
                .create_project(&Project {
                    id: "p1".to_string(),
                    name: "p1".to_string(),
                    token: "repo-p1".to_string(),
                    default_branch: String::new(),
                    base_url: String::new(),
                    coverage_rate: 0.0,
                    user_id: bob.id,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .unwrap();

            Self {
                _temp: temp,
                store,
                sessions: SessionStore::new(),
                alice,
                bob,
            }
        }

        fn resolve(&self, creds: Credentials) -> Option<Principal> {
            let ctx = ResolveContext {
                store: &self.store,
                sessions: &self.sessions,
            };
            resolve_principal(&creds, &ctx).unwrap()
        }
    }

    fn token(t: &str) -> Credentials {
        Credentials {
            session_id: None,
            token: Some(t.to_string()),
        }
    }

    #[test]
    fn test_session_wins_over_token() {
        let f = Fixture::new();
        let sid = f.sessions.create_session(f.alice.id, ProviderToken::default());
        f.store.create_user_token(f.bob.id, "cli", "ut-bob").unwrap();

        let principal = f
            .resolve(Credentials {
                session_id: Some(sid),
                token: Some("ut-bob".to_string()),
            })
            .unwrap();
        assert_eq!(principal.method, AuthMethod::Session);
        assert_eq!(principal.user.id, f.alice.id);
        assert!(principal.session_id.is_some());
    }

    #[test]
    fn test_stale_session_falls_through_to_token() {
        let f = Fixture::new();
        f.store.create_user_token(f.bob.id, "cli", "ut-bob").unwrap();

        let principal = f
            .resolve(Credentials {
                session_id: Some("gone".to_string()),
                token: Some("ut-bob".to_string()),
            })
            .unwrap();
        assert_eq!(principal.method, AuthMethod::UserToken);
        assert_eq!(principal.user.id, f.bob.id);
    }

    #[test]
    fn test_user_token_stamps_last_use() {
        let f = Fixture::new();
        f.store.create_user_token(f.alice.id, "cli", "ut-alice").unwrap();

        let principal = f.resolve(token("ut-alice")).unwrap();
        assert_eq!(principal.method, AuthMethod::UserToken);
        assert!(principal.project.is_none());

        let stored = f.store.get_user_token_by_token("ut-alice").unwrap().unwrap();
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn test_project_token_attaches_scope() {
        let f = Fixture::new();
        f.store.create_project_token("p1", "ci", "pt-1").unwrap();

        let principal = f.resolve(token("pt-1")).unwrap();
        assert_eq!(principal.method, AuthMethod::ProjectToken);
        assert_eq!(principal.user.id, f.bob.id);
        assert_eq!(principal.project.as_ref().unwrap().id, "p1");

        let stored = f.store.get_project_token_by_token("pt-1").unwrap().unwrap();
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn test_legacy_token() {
        let f = Fixture::new();
        let principal = f.resolve(token("legacy-alice")).unwrap();
        assert_eq!(principal.method, AuthMethod::LegacyToken);
        assert_eq!(principal.user.id, f.alice.id);
    }

    #[test]
    fn test_no_match() {
        let f = Fixture::new();
        assert!(f.resolve(token("nope")).is_none());
        assert!(f.resolve(Credentials::default()).is_none());
        // the upload secret is not an API credential
        assert!(f.resolve(token("repo-p1")).is_none());
    }

    #[test]
    fn test_deleted_user_cannot_authenticate() {
        let f = Fixture::new();
        f.store.create_user_token(f.alice.id, "cli", "ut-alice").unwrap();
        let sid = f.sessions.create_session(f.alice.id, ProviderToken::default());
        f.store
            .delete_user_transferring_projects(f.alice.id, f.bob.id)
            .unwrap();

        assert!(f.resolve(token("ut-alice")).is_none());
        assert!(f.resolve(token("legacy-alice")).is_none());
        assert!(
            f.resolve(Credentials {
                session_id: Some(sid),
                token: None
            })
            .is_none()
        );
    }

    #[test]
    fn test_can_manage() {
        let f = Fixture::new();
        let project = f.store.get_project("p1").unwrap().unwrap();

        let owner = Principal::new(f.bob.clone(), AuthMethod::Session);
        let stranger = Principal::new(f.alice.clone(), AuthMethod::Session);
        assert!(owner.can_manage(&project));
        assert!(!stranger.can_manage(&project));

        let mut admin = f.alice.clone();
        admin.admin = true;
        assert!(Principal::new(admin, AuthMethod::Session).can_manage(&project));
    }
}
