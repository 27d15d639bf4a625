use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{Error, Result};

/// Identity fields read from a verified ID token or a userinfo response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub groups: BTreeSet<String>,
}

/// Pulls the identity out of a claim set. Only `sub` is mandatory.
pub fn extract_claims(claims: &Value, groups_claim: &str) -> Result<IdentityClaims> {
    let subject = string_claim(claims, "sub")
        .ok_or_else(|| Error::InvalidIdToken("missing sub claim".to_string()))?;
    let email = string_claim(claims, "email").unwrap_or_default();

    let name = string_claim(claims, "name")
        .or_else(|| string_claim(claims, "preferred_username"))
        .unwrap_or_else(|| email.clone());

    let email_verified = match claims.get("email_verified") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    Ok(IdentityClaims {
        subject,
        email,
        email_verified,
        name,
        groups: normalize_groups(claims.get(groups_claim)),
    })
}

/// A groups claim may be a list of strings or one string. Anything else,
/// including a missing claim, means no groups.
#[must_use]
pub fn normalize_groups(raw: Option<&Value>) -> BTreeSet<String> {
    let clean = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    match raw {
        Some(Value::String(s)) => clean(s).into_iter().collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(clean)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn string_claim(claims: &Value, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_full_claims() {
        let claims = json!({
            "sub": "abc",
            "email": "dev@example.com",
            "email_verified": true,
            "name": "Dev",
            "groups": ["eng", "ops", 3]
        });
        let identity = extract_claims(&claims, "groups").unwrap();
        assert_eq!(identity.subject, "abc");
        assert_eq!(identity.email, "dev@example.com");
        assert!(identity.email_verified);
        assert_eq!(identity.name, "Dev");
        assert_eq!(
            identity.groups,
            BTreeSet::from(["eng".to_string(), "ops".to_string()])
        );
    }

    #[test]
    fn test_custom_groups_claim_as_string() {
        let claims = json!({"sub": "abc", "roles": "admins", "groups": ["ignored"]});
        let identity = extract_claims(&claims, "roles").unwrap();
        assert_eq!(identity.groups, BTreeSet::from(["admins".to_string()]));
    }

    #[test]
    fn test_unexpected_group_shapes_mean_no_groups() {
        for raw in [json!(null), json!(42), json!({"a": "b"}), json!(""), json!([])] {
            assert!(normalize_groups(Some(&raw)).is_empty(), "{raw}");
        }
        assert!(normalize_groups(None).is_empty());
    }

    #[test]
    fn test_name_falls_back() {
        let claims = json!({"sub": "abc", "preferred_username": "devname"});
        assert_eq!(extract_claims(&claims, "groups").unwrap().name, "devname");

        let claims = json!({"sub": "abc", "email": "x@example.com", "email_verified": "true"});
        let identity = extract_claims(&claims, "groups").unwrap();
        assert_eq!(identity.name, "x@example.com");
        assert!(identity.email_verified);
    }

    #[test]
    fn test_missing_subject_is_rejected() {
        let result = extract_claims(&json!({"email": "x@example.com"}), "groups");
        assert!(matches!(result, Err(Error::InvalidIdToken(_))));
    }
}
