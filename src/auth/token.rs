use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

const TOKEN_PREFIX: &str = "cvh";
const SECRET_BYTES: usize = 32;

/// The kinds of long-lived credential the server hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Named credential belonging to a user.
    User,
    /// Named credential scoped to one project.
    Project,
    /// A project's `repo_token` for coverage uploads.
    Upload,
    /// The single inline token stored on a user row.
    Legacy,
}

impl TokenKind {
    fn tag(self) -> &'static str {
        match self {
            TokenKind::User => "u",
            TokenKind::Project => "p",
            TokenKind::Upload => "r",
            TokenKind::Legacy => "l",
        }
    }
}

/// Returns `n` bytes from the OS RNG as URL-safe base64 without padding.
#[must_use]
pub fn random_urlsafe(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a new token with the format: cvh_<kind>_<secret>
#[must_use]
pub fn generate_token(kind: TokenKind) -> String {
    format!("{TOKEN_PREFIX}_{}_{}", kind.tag(), random_urlsafe(SECRET_BYTES))
}

/// Reads the kind back from a generated token. Tokens issued elsewhere
/// (or before prefixes existed) yield `None` and are still looked up.
#[must_use]
pub fn token_kind(token: &str) -> Option<TokenKind> {
    let rest = token.strip_prefix(TOKEN_PREFIX)?.strip_prefix('_')?;
    let (tag, secret) = rest.split_once('_')?;
    if secret.is_empty() {
        return None;
    }
    [TokenKind::User, TokenKind::Project, TokenKind::Upload, TokenKind::Legacy]
        .into_iter()
        .find(|kind| kind.tag() == tag)
}
