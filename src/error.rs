use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid token")]
    InvalidToken,

    #[error("expired")]
    Expired,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("oidc is not configured")]
    OidcDisabled,

    #[error("code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("invalid id token: {0}")]
    InvalidIdToken(String),
}

pub type Result<T> = std::result::Result<T, Error>;
