use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub admin: bool,
    #[serde(skip)]
    pub oidc_subject: Option<String>,
    pub email_verified: bool,
    pub groups: BTreeSet<String>,
    /// Legacy static credential. Only ever shown to its owner.
    #[serde(skip)]
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Fields needed to insert a user; the row id is assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub admin: bool,
    pub oidc_subject: Option<String>,
    pub email_verified: bool,
    pub groups: BTreeSet<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Secret upload token carried as `repo_token` in coverage payloads.
    pub token: String,
    pub default_branch: String,
    pub base_url: String,
    pub coverage_rate: f64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectShare {
    pub id: i64,
    pub project_id: String,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectToken {
    pub id: i64,
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub project_id: String,
    pub build_num: i64,
    pub branch: String,
    pub commit_sha: String,
    pub commit_msg: String,
    pub coverage_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub build_id: i64,
    pub job_number: String,
    pub coverage_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub id: i64,
    pub job_id: i64,
    pub name: String,
    pub source: String,
    /// Per-line coverage array exactly as uploaded, JSON encoded.
    pub coverage: String,
    pub coverage_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectWithShares {
    #[serde(flatten)]
    pub project: Project,
    pub shares: Vec<ProjectShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildWithJobs {
    #[serde(flatten)]
    pub build: Build,
    pub jobs: Vec<Job>,
}
