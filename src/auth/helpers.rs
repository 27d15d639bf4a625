use serde::Deserialize;

/// Raw credentials gathered from one request, before any lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub session_id: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.token.is_none()
    }
}

#[derive(Deserialize)]
struct TokenParam {
    token: Option<String>,
}

/// Extracts a token from an Authorization header value. `Bearer <token>` is
/// the documented form; a bare token is accepted for older clients.
#[must_use]
pub fn extract_token_from_header(header: Option<&str>) -> Option<String> {
    let header = header?.trim();
    let token = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => header,
    };
    non_empty(token)
}

/// Reads the `token` parameter from a query string.
#[must_use]
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    token_from_urlencoded(query?.as_bytes())
}

/// Reads the `token` field from an `application/x-www-form-urlencoded` body.
#[must_use]
pub fn token_from_urlencoded(raw: &[u8]) -> Option<String> {
    serde_urlencoded::from_bytes::<TokenParam>(raw)
        .ok()
        .and_then(|p| p.token)
        .and_then(|t| non_empty(&t))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_forms() {
        assert_eq!(extract_token_from_header(Some("Bearer abc")), Some("abc".to_string()));
        assert_eq!(extract_token_from_header(Some("bearer  abc ")), Some("abc".to_string()));
        assert_eq!(extract_token_from_header(Some("abc")), Some("abc".to_string()));
        assert_eq!(extract_token_from_header(Some("Basic eDp5")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_query_and_form() {
        assert_eq!(token_from_query(Some("a=1&token=xyz")), Some("xyz".to_string()));
        assert_eq!(token_from_query(Some("a=1")), None);
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(None), None);
        assert_eq!(
            token_from_urlencoded(b"json=%7B%7D&token=t%2B1"),
            Some("t+1".to_string())
        );
    }
}
