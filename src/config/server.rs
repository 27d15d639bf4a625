use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];
pub const DEFAULT_GROUPS_CLAIM: &str = "groups";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Explicit database file. Defaults to `<data_dir>/coverhub.db`.
    pub database_path: Option<PathBuf>,
    /// Where the browser lands after login.
    pub frontend_url: Option<String>,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    /// Promoted to admin at startup, or on first login.
    pub first_admin_email: Option<String>,
    pub oidc: OidcConfig,
}

/// Raw OIDC settings as configured. See [`OidcConfig::settings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub groups_claim: String,
    pub http_timeout_secs: u64,
}

/// OIDC settings of an enabled provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcSettings {
    pub issuer: String,
    pub client_id: String,
    pub redirect_url: String,
    /// Always starts with `openid`.
    pub scopes: Vec<String>,
    pub groups_claim: String,
    pub http_timeout: Duration,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("coverhub.db"))
    }

    /// Loads the TOML file if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overrides fields from environment-style variables read through `lookup`.
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.host = v;
        }
        if let Some(v) = get("PORT") {
            self.port = v
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {v}")))?;
        }
        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FRONTEND_URL") {
            self.frontend_url = Some(v);
        }
        if let Some(v) = get("COOKIE_DOMAIN") {
            self.cookie_domain = Some(v);
        }
        if let Some(v) = get("COOKIE_SECURE") {
            self.cookie_secure = parse_bool("COOKIE_SECURE", &v)?;
        }
        if let Some(v) = get("FIRST_ADMIN_EMAIL") {
            self.first_admin_email = Some(v);
        }
        if let Some(v) = get("OIDC_ISSUER") {
            self.oidc.issuer = v;
        }
        if let Some(v) = get("OIDC_CLIENT_ID") {
            self.oidc.client_id = v;
        }
        if let Some(v) = get("OIDC_REDIRECT_URL") {
            self.oidc.redirect_url = v;
        }
        if let Some(v) = get("OIDC_SCOPES") {
            self.oidc.scopes = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("OIDC_GROUPS_CLAIM") {
            self.oidc.groups_claim = v;
        }
        if let Some(v) = get("OIDC_HTTP_TIMEOUT_SECS") {
            self.oidc.http_timeout_secs = v.parse().map_err(|_| {
                Error::Config(format!("OIDC_HTTP_TIMEOUT_SECS is not a number: {v}"))
            })?;
        }
        Ok(())
    }

    /// The configured first-admin email, trimmed and lowercased.
    #[must_use]
    pub fn first_admin(&self) -> Option<String> {
        self.first_admin_email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    #[must_use]
    pub fn is_first_admin(&self, email: &str) -> bool {
        self.first_admin()
            .is_some_and(|admin| admin == email.trim().to_lowercase())
    }

    #[must_use]
    pub fn oidc_settings(&self) -> Option<OidcSettings> {
        self.oidc.settings()
    }
}

impl OidcConfig {
    /// Present only when both issuer and client id are set.
    #[must_use]
    pub fn settings(&self) -> Option<OidcSettings> {
        let issuer = self.issuer.trim();
        let client_id = self.client_id.trim();
        if issuer.is_empty() || client_id.is_empty() {
            return None;
        }

        let mut scopes = vec!["openid".to_string()];
        for scope in &self.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }

        let groups_claim = if self.groups_claim.trim().is_empty() {
            DEFAULT_GROUPS_CLAIM.to_string()
        } else {
            self.groups_claim.trim().to_string()
        };

        Some(OidcSettings {
            issuer: issuer.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            redirect_url: self.redirect_url.trim().to_string(),
            scopes,
            groups_claim,
            http_timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} is not a boolean: {value}"))),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            database_path: None,
            frontend_url: None,
            cookie_domain: None,
            cookie_secure: false,
            first_admin_email: None,
            oidc: OidcConfig::default(),
        }
    }
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            redirect_url: String::new(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            groups_claim: DEFAULT_GROUPS_CLAIM.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.db_path(), PathBuf::from("./data/coverhub.db"));
        assert!(config.oidc_settings().is_none());
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env_with(env(&[
                ("PORT", "9000"),
                ("DATABASE_PATH", "/tmp/cov.db"),
                ("COOKIE_SECURE", "true"),
                ("OIDC_ISSUER", "https://idp.example.com/"),
                ("OIDC_CLIENT_ID", "coverhub"),
                ("OIDC_SCOPES", "email, groups"),
                ("FRONTEND_URL", ""),
            ]))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/cov.db"));
        assert!(config.cookie_secure);
        assert!(config.frontend_url.is_none());

        let oidc = config.oidc_settings().unwrap();
        assert_eq!(oidc.issuer, "https://idp.example.com");
        assert_eq!(oidc.scopes, vec!["openid", "email", "groups"]);
        assert_eq!(oidc.groups_claim, "groups");
        assert_eq!(oidc.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = ServerConfig::default();
        assert!(matches!(
            config.apply_env_with(env(&[("PORT", "eighty")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config.apply_env_with(env(&[("COOKIE_SECURE", "maybe")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_oidc_requires_issuer_and_client() {
        let mut config = ServerConfig::default();
        config
            .apply_env_with(env(&[("OIDC_ISSUER", "https://idp.example.com")]))
            .unwrap();
        assert!(config.oidc_settings().is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = ServerConfig::from_toml(
            r#"
            port = 7070
            first_admin_email = " Admin@Example.com "

            [oidc]
            issuer = "https://idp.example.com"
            client_id = "cov"
            groups_claim = "roles"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 7070);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.is_first_admin("admin@example.com"));
        assert!(!config.is_first_admin("other@example.com"));

        let oidc = config.oidc_settings().unwrap();
        assert_eq!(oidc.groups_claim, "roles");
        assert_eq!(oidc.scopes, vec!["openid", "profile", "email"]);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(matches!(
            ServerConfig::from_toml("port = \"x\""),
            Err(Error::Config(_))
        ));
    }
}
