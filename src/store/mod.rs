mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::BTreeSet;

use crate::coverage::{CoverageReport, RecordedCoverage};
use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations (soft-deleted users are never returned)
    fn create_user(&self, user: &NewUser) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>>;
    fn get_user_by_token(&self, token: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn set_user_groups(&self, id: i64, groups: &BTreeSet<String>) -> Result<()>;
    /// Reassigns the user's projects to `new_owner_id`, removes their tokens,
    /// and soft-deletes them, all in one transaction.
    fn delete_user_transferring_projects(&self, id: i64, new_owner_id: i64) -> Result<bool>;

    // User token operations
    fn create_user_token(&self, user_id: i64, name: &str, token: &str) -> Result<UserToken>;
    fn get_user_token_by_token(&self, token: &str) -> Result<Option<UserToken>>;
    fn list_user_tokens(&self, user_id: i64) -> Result<Vec<UserToken>>;
    fn delete_user_token(&self, user_id: i64, id: i64) -> Result<bool>;
    fn touch_user_token(&self, id: i64) -> Result<()>;

    // Project operations
    fn create_project(&self, project: &Project) -> Result<()>;
    fn get_project(&self, id: &str) -> Result<Option<Project>>;
    fn get_project_by_token(&self, token: &str) -> Result<Option<Project>>;
    fn list_projects(&self) -> Result<Vec<Project>>;
    /// Projects owned by `user_id` or shared with any of `groups`.
    fn list_projects_visible_to(&self, user_id: i64, groups: &BTreeSet<String>)
    -> Result<Vec<Project>>;
    fn update_project(&self, project: &Project) -> Result<()>;
    fn delete_project(&self, id: &str) -> Result<bool>;

    // Project share operations
    fn create_project_share(&self, project_id: &str, group_name: &str) -> Result<ProjectShare>;
    fn list_project_shares(&self, project_id: &str) -> Result<Vec<ProjectShare>>;
    fn delete_project_share(&self, project_id: &str, id: i64) -> Result<bool>;

    // Project token operations
    fn create_project_token(&self, project_id: &str, name: &str, token: &str)
    -> Result<ProjectToken>;
    fn get_project_token_by_token(&self, token: &str) -> Result<Option<ProjectToken>>;
    fn list_project_tokens(&self, project_id: &str) -> Result<Vec<ProjectToken>>;
    fn delete_project_token(&self, project_id: &str, id: i64) -> Result<bool>;
    fn touch_project_token(&self, id: i64) -> Result<()>;

    // Coverage operations
    /// Creates the next build, its job and files, and updates the job, build
    /// and project rates as one atomic unit.
    fn record_coverage(&self, project_id: &str, report: &CoverageReport)
    -> Result<RecordedCoverage>;
    fn list_builds(&self, project_id: &str) -> Result<Vec<Build>>;
    fn get_build(&self, id: i64) -> Result<Option<Build>>;
    fn list_jobs(&self, build_id: i64) -> Result<Vec<Job>>;
    fn get_job(&self, id: i64) -> Result<Option<Job>>;
    fn list_job_files(&self, job_id: i64) -> Result<Vec<JobFile>>;
    fn get_job_file(&self, id: i64) -> Result<Option<JobFile>>;

    fn close(&self) -> Result<()>;
}
