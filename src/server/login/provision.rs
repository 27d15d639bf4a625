use crate::auth::{TokenKind, generate_token};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::oidc::IdentityClaims;
use crate::store::Store;
use crate::types::{NewUser, User};

/// Finds or creates the local user for a verified identity.
///
/// Users are matched by OIDC subject first. A pre-seeded user with the same
/// email and no subject yet is linked to the identity, but only when the
/// provider vouches for the email. Otherwise a new user is created, as admin
/// if the verified email is the configured first admin. Groups and the
/// verified flag are refreshed on every login.
pub fn provision_user(
    store: &dyn Store,
    config: &ServerConfig,
    identity: &IdentityClaims,
) -> Result<User> {
    if let Some(mut user) = store.get_user_by_subject(&identity.subject)? {
        refresh_profile(&mut user, identity);
        store.update_user(&user)?;
        return Ok(user);
    }

    if !identity.email.is_empty() {
        if let Some(mut user) = store.get_user_by_email(&identity.email)? {
            if user.oidc_subject.is_some() {
                return Err(Error::Conflict(
                    "email is already linked to another identity".to_string(),
                ));
            }
            if !identity.email_verified {
                tracing::warn!(
                    user_id = user.id,
                    "refusing to link identity with an unverified email"
                );
                return Err(Error::Conflict(
                    "email must be verified to link an existing account".to_string(),
                ));
            }
            user.oidc_subject = Some(identity.subject.clone());
            refresh_profile(&mut user, identity);
            store.update_user(&user)?;
            tracing::info!(user_id = user.id, "linked identity to existing user");
            return Ok(user);
        }
    }

    let admin = identity.email_verified && config.is_first_admin(&identity.email);
    let user = store.create_user(&NewUser {
        email: identity.email.clone(),
        name: identity.name.clone(),
        admin,
        oidc_subject: Some(identity.subject.clone()),
        email_verified: identity.email_verified,
        groups: identity.groups.clone(),
        token: Some(generate_token(TokenKind::Legacy)),
    })?;

    tracing::info!(user_id = user.id, admin, "created user on first login");
    Ok(user)
}

fn refresh_profile(user: &mut User, identity: &IdentityClaims) {
    if !identity.name.is_empty() {
        user.name = identity.name.clone();
    }
    user.email_verified = identity.email_verified;
    user.groups = identity.groups.clone();
}

/// Promotes the configured first admin if they already exist.
pub fn bootstrap_first_admin(store: &dyn Store, config: &ServerConfig) -> Result<Option<User>> {
    let Some(email) = config.first_admin() else {
        return Ok(None);
    };

    let existing = store
        .list_users()?
        .into_iter()
        .find(|u| u.email.trim().eq_ignore_ascii_case(&email));

    match existing {
        Some(mut user) if !user.admin => {
            user.admin = true;
            store.update_user(&user)?;
            tracing::info!(user_id = user.id, "promoted first admin");
            Ok(Some(user))
        }
        Some(user) => Ok(Some(user)),
        None => {
            tracing::info!(
                "first admin {email} has not logged in yet; they become admin on first login"
            );
            Ok(None)
        }
    }
}
