//! Coveralls-compatible upload document.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverallsPayload {
    #[serde(default)]
    pub repo_token: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub service_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub service_job_id: Option<String>,
    #[serde(default)]
    pub git: Option<GitInfo>,
    #[serde(default)]
    pub source_files: Vec<SourceFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitInfo {
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub head: GitHead,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHead {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    #[serde(default)]
    pub source: String,
    /// One entry per source line: `null` for lines that are not executable,
    /// otherwise the hit count.
    #[serde(default)]
    pub coverage: Vec<Value>,
}

impl CoverallsPayload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// The upload token, if one was supplied.
    #[must_use]
    pub fn repo_token(&self) -> Option<&str> {
        let token = self.repo_token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// The caller-supplied job identifier, if any.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.service_job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        self.git.as_ref().map_or("", |g| g.branch.as_str())
    }

    #[must_use]
    pub fn commit_sha(&self) -> &str {
        self.git.as_ref().map_or("", |g| g.head.id.as_str())
    }

    #[must_use]
    pub fn commit_message(&self) -> &str {
        self.git.as_ref().map_or("", |g| g.head.message.as_str())
    }
}

/// CI services disagree on whether build/job identifiers are strings or numbers.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let payload = CoverallsPayload::from_json(
            r#"{
                "repo_token": "abc",
                "service_name": "github-actions",
                "service_number": 42,
                "service_job_id": "job-7",
                "git": {"branch": "main", "head": {"id": "deadbeef", "message": "fix"}},
                "source_files": [
                    {"name": "lib.rs", "source": "fn a() {}\n", "coverage": [null, 1, 0]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(payload.repo_token(), Some("abc"));
        assert_eq!(payload.service_number.as_deref(), Some("42"));
        assert_eq!(payload.job_id(), Some("job-7"));
        assert_eq!(payload.branch(), "main");
        assert_eq!(payload.commit_sha(), "deadbeef");
        assert_eq!(payload.commit_message(), "fix");
        assert_eq!(payload.source_files.len(), 1);
        assert_eq!(payload.source_files[0].coverage.len(), 3);
    }

    #[test]
    fn test_missing_git_yields_empty_metadata() {
        let payload = CoverallsPayload::from_json(r#"{"repo_token": "abc"}"#).unwrap();
        assert_eq!(payload.branch(), "");
        assert_eq!(payload.commit_sha(), "");
        assert!(payload.source_files.is_empty());
    }

    #[test]
    fn test_blank_identifiers_are_absent() {
        let payload =
            CoverallsPayload::from_json(r#"{"repo_token": "  ", "service_job_id": ""}"#).unwrap();
        assert_eq!(payload.repo_token(), None);
        assert_eq!(payload.job_id(), None);
    }

    #[test]
    fn test_malformed_json_is_invalid_payload() {
        let err = CoverallsPayload::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[test]
    fn test_source_file_without_name_is_rejected() {
        let err = CoverallsPayload::from_json(
            r#"{"repo_token": "abc", "source_files": [{"coverage": [1]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }
}
