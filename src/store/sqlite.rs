use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params,
    params_from_iter, types::Value,
};

use super::Store;
use super::schema::SCHEMA;
use crate::coverage::{CoverageReport, RecordedCoverage};
use crate::error::{Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "id, email, name, admin, oidc_subject, email_verified, groups_json, token, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, name, token, default_branch, base_url, coverage_rate, user_id, created_at, updated_at";
const BUILD_COLUMNS: &str =
    "id, project_id, build_num, branch, commit_sha, commit_msg, coverage_rate, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    fn insert_coverage(
        tx: &Transaction<'_>,
        project_id: &str,
        report: &CoverageReport,
    ) -> Result<RecordedCoverage> {
        let now = Utc::now();
        let rate = report.coverage_rate();

        let build_num: i64 = tx.query_row(
            "SELECT COALESCE(MAX(build_num), 0) + 1 FROM builds WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO builds (project_id, build_num, branch, commit_sha, commit_msg, coverage_rate, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                project_id,
                build_num,
                report.branch,
                report.commit_sha,
                report.commit_msg,
                format_datetime(&now),
            ],
        )?;
        let build_id = tx.last_insert_rowid();

        let job_number = report.job_number(build_num);
        tx.execute(
            "INSERT INTO jobs (build_id, job_number, coverage_rate, created_at) VALUES (?1, ?2, 0, ?3)",
            params![build_id, job_number, format_datetime(&now)],
        )?;
        let job_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO job_files (job_id, name, source, coverage, coverage_rate, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for file in &report.files {
                stmt.execute(params![
                    job_id,
                    file.name,
                    file.source,
                    file.coverage_json,
                    file.coverage_rate,
                    format_datetime(&now),
                ])?;
            }
        }

        tx.execute(
            "UPDATE jobs SET coverage_rate = ?1 WHERE id = ?2",
            params![rate, job_id],
        )?;
        tx.execute(
            "UPDATE builds SET coverage_rate = ?1 WHERE id = ?2",
            params![rate, build_id],
        )?;
        tx.execute(
            "UPDATE projects SET coverage_rate = ?1, updated_at = ?2 WHERE id = ?3",
            params![rate, format_datetime(&now), project_id],
        )?;

        Ok(RecordedCoverage {
            build: Build {
                id: build_id,
                project_id: project_id.to_string(),
                build_num,
                branch: report.branch.clone(),
                commit_sha: report.commit_sha.clone(),
                commit_msg: report.commit_msg.clone(),
                coverage_rate: rate,
                created_at: now,
            },
            job: Job {
                id: job_id,
                build_id,
                job_number,
                coverage_rate: rate,
                created_at: now,
            },
            file_count: report.files.len(),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn is_constraint_violation(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Maps a uniqueness failure on insert or update to [`Error::AlreadyExists`].
fn map_conflict(result: rusqlite::Result<usize>) -> Result<usize> {
    match result {
        Ok(rows) => Ok(rows),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::AlreadyExists)
        }
        Err(e) => Err(Error::from(e)),
    }
}

fn encode_groups(groups: &BTreeSet<String>) -> String {
    serde_json::to_string(groups).unwrap_or_else(|_| "[]".to_string())
}

fn decode_groups(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::error!("Invalid groups in database: '{}' - {}", raw, e);
        BTreeSet::new()
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        admin: row.get(3)?,
        oidc_subject: row.get(4)?,
        email_verified: row.get(5)?,
        groups: decode_groups(&row.get::<_, String>(6)?),
        token: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn user_token_from_row(row: &Row<'_>) -> rusqlite::Result<UserToken> {
    Ok(UserToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        token: row.get(3)?,
        last_used_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        token: row.get(2)?,
        default_branch: row.get(3)?,
        base_url: row.get(4)?,
        coverage_rate: row.get(5)?,
        user_id: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn project_token_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectToken> {
    Ok(ProjectToken {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        token: row.get(3)?,
        last_used_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn build_from_row(row: &Row<'_>) -> rusqlite::Result<Build> {
    Ok(Build {
        id: row.get(0)?,
        project_id: row.get(1)?,
        build_num: row.get(2)?,
        branch: row.get(3)?,
        commit_sha: row.get(4)?,
        commit_msg: row.get(5)?,
        coverage_rate: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        build_id: row.get(1)?,
        job_number: row.get(2)?,
        coverage_rate: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn job_file_from_row(row: &Row<'_>) -> rusqlite::Result<JobFile> {
    Ok(JobFile {
        id: row.get(0)?,
        job_id: row.get(1)?,
        name: row.get(2)?,
        source: row.get(3)?,
        coverage: row.get(4)?,
        coverage_rate: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

impl SqliteStore {
    fn find_user(&self, column: &str, value: Value) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1 AND deleted_at IS NULL"
            ),
            params![value],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();
        let conn = self.conn();
        map_conflict(conn.execute(
            "INSERT INTO users (email, name, admin, oidc_subject, email_verified, groups_json, token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                user.email,
                user.name,
                user.admin,
                user.oidc_subject,
                user.email_verified,
                encode_groups(&user.groups),
                user.token,
                format_datetime(&now),
            ],
        ))?;

        Ok(User {
            id: conn.last_insert_rowid(),
            email: user.email.clone(),
            name: user.name.clone(),
            admin: user.admin,
            oidc_subject: user.oidc_subject.clone(),
            email_verified: user.email_verified,
            groups: user.groups.clone(),
            token: user.token.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.find_user("id", Value::Integer(id))
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user("email", Value::Text(email.to_string()))
    }

    fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>> {
        self.find_user("oidc_subject", Value::Text(subject.to_string()))
    }

    fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        self.find_user("token", Value::Text(token.to_string()))
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY id"
        ))?;

        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = map_conflict(self.conn().execute(
            "UPDATE users SET email = ?1, name = ?2, admin = ?3, oidc_subject = ?4,
                email_verified = ?5, groups_json = ?6, token = ?7, updated_at = ?8
             WHERE id = ?9 AND deleted_at IS NULL",
            params![
                user.email,
                user.name,
                user.admin,
                user.oidc_subject,
                user.email_verified,
                encode_groups(&user.groups),
                user.token,
                format_datetime(&Utc::now()),
                user.id,
            ],
        ))?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn set_user_groups(&self, id: i64, groups: &BTreeSet<String>) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET groups_json = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![encode_groups(groups), format_datetime(&Utc::now()), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user_transferring_projects(&self, id: i64, new_owner_id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = format_datetime(&Utc::now());

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }

        tx.execute(
            "UPDATE projects SET user_id = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![new_owner_id, now, id],
        )?;
        tx.execute("DELETE FROM user_tokens WHERE user_id = ?1", params![id])?;
        tx.execute(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;

        tx.commit()?;
        Ok(true)
    }

    // User token operations

    fn create_user_token(&self, user_id: i64, name: &str, token: &str) -> Result<UserToken> {
        let now = Utc::now();
        let conn = self.conn();
        map_conflict(conn.execute(
            "INSERT INTO user_tokens (user_id, name, token, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, name, token, format_datetime(&now)],
        ))?;

        Ok(UserToken {
            id: conn.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            token: token.to_string(),
            last_used_at: None,
            created_at: now,
        })
    }

    fn get_user_token_by_token(&self, token: &str) -> Result<Option<UserToken>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, name, token, last_used_at, created_at
             FROM user_tokens WHERE token = ?1",
            params![token],
            user_token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: i64) -> Result<Vec<UserToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, token, last_used_at, created_at
             FROM user_tokens WHERE user_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![user_id], user_token_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_user_token(&self, user_id: i64, id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM user_tokens WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    fn touch_user_token(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE user_tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Project operations

    fn create_project(&self, project: &Project) -> Result<()> {
        map_conflict(self.conn().execute(
            "INSERT INTO projects (id, name, token, default_branch, base_url, coverage_rate, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                project.id,
                project.name,
                project.token,
                project.default_branch,
                project.base_url,
                project.coverage_rate,
                project.user_id,
                format_datetime(&project.created_at),
                format_datetime(&project.updated_at),
            ],
        ))?;
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_project_by_token(&self, token: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE token = ?1"),
            params![token],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, id"
        ))?;

        let rows = stmt.query_map([], project_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_projects_visible_to(
        &self,
        user_id: i64,
        groups: &BTreeSet<String>,
    ) -> Result<Vec<Project>> {
        let mut sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ?1");
        if !groups.is_empty() {
            let placeholders = (0..groups.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " OR id IN (SELECT project_id FROM project_shares WHERE group_name IN ({placeholders}))"
            ));
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let values = std::iter::once(Value::Integer(user_id))
            .chain(groups.iter().map(|g| Value::Text(g.clone())));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), project_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        let rows = map_conflict(self.conn().execute(
            "UPDATE projects SET name = ?1, token = ?2, default_branch = ?3, base_url = ?4,
                user_id = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                project.name,
                project.token,
                project.default_branch,
                project.base_url,
                project.user_id,
                format_datetime(&Utc::now()),
                project.id,
            ],
        ))?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Project share operations

    fn create_project_share(&self, project_id: &str, group_name: &str) -> Result<ProjectShare> {
        let now = Utc::now();
        let conn = self.conn();
        map_conflict(conn.execute(
            "INSERT INTO project_shares (project_id, group_name, created_at) VALUES (?1, ?2, ?3)",
            params![project_id, group_name, format_datetime(&now)],
        ))?;

        Ok(ProjectShare {
            id: conn.last_insert_rowid(),
            project_id: project_id.to_string(),
            group_name: group_name.to_string(),
            created_at: now,
        })
    }

    fn list_project_shares(&self, project_id: &str) -> Result<Vec<ProjectShare>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, group_name, created_at
             FROM project_shares WHERE project_id = ?1 ORDER BY group_name",
        )?;

        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ProjectShare {
                id: row.get(0)?,
                project_id: row.get(1)?,
                group_name: row.get(2)?,
                created_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_project_share(&self, project_id: &str, id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM project_shares WHERE id = ?1 AND project_id = ?2",
            params![id, project_id],
        )?;
        Ok(rows > 0)
    }

    // Project token operations

    fn create_project_token(
        &self,
        project_id: &str,
        name: &str,
        token: &str,
    ) -> Result<ProjectToken> {
        let now = Utc::now();
        let conn = self.conn();
        map_conflict(conn.execute(
            "INSERT INTO project_tokens (project_id, name, token, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![project_id, name, token, format_datetime(&now)],
        ))?;

        Ok(ProjectToken {
            id: conn.last_insert_rowid(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            token: token.to_string(),
            last_used_at: None,
            created_at: now,
        })
    }

    fn get_project_token_by_token(&self, token: &str) -> Result<Option<ProjectToken>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, project_id, name, token, last_used_at, created_at
             FROM project_tokens WHERE token = ?1",
            params![token],
            project_token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_project_tokens(&self, project_id: &str) -> Result<Vec<ProjectToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, token, last_used_at, created_at
             FROM project_tokens WHERE project_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![project_id], project_token_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_project_token(&self, project_id: &str, id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM project_tokens WHERE id = ?1 AND project_id = ?2",
            params![id, project_id],
        )?;
        Ok(rows > 0)
    }

    fn touch_project_token(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE project_tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Coverage operations

    fn record_coverage(
        &self,
        project_id: &str,
        report: &CoverageReport,
    ) -> Result<RecordedCoverage> {
        let mut conn = self.conn();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match Self::insert_coverage(&tx, project_id, report) {
                Ok(recorded) => {
                    tx.commit()?;
                    return Ok(recorded);
                }
                Err(e) if attempt < 2 && is_constraint_violation(&e) => {
                    drop(tx);
                    tracing::warn!(project_id, "build number conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn list_builds(&self, project_id: &str) -> Result<Vec<Build>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUILD_COLUMNS} FROM builds WHERE project_id = ?1 ORDER BY build_num DESC"
        ))?;

        let rows = stmt.query_map(params![project_id], build_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_build(&self, id: i64) -> Result<Option<Build>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BUILD_COLUMNS} FROM builds WHERE id = ?1"),
            params![id],
            build_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_jobs(&self, build_id: i64) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, build_id, job_number, coverage_rate, created_at
             FROM jobs WHERE build_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![build_id], job_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, build_id, job_number, coverage_rate, created_at FROM jobs WHERE id = ?1",
            params![id],
            job_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_job_files(&self, job_id: i64) -> Result<Vec<JobFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, name, source, coverage, coverage_rate, created_at
             FROM job_files WHERE job_id = ?1 ORDER BY name",
        )?;

        let rows = stmt.query_map(params![job_id], job_file_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_job_file(&self, id: i64) -> Result<Option<JobFile>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, job_id, name, source, coverage, coverage_rate, created_at
             FROM job_files WHERE id = ?1",
            params![id],
            job_file_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverallsPayload;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn seed_user(store: &SqliteStore, email: &str) -> User {
        store
            .create_user(&NewUser {
                email: email.to_string(),
                name: email.to_string(),
                token: Some(format!("legacy-{email}")),
                ..Default::default()
            })
            .unwrap()
    }

    fn seed_project(store: &SqliteStore, id: &str, owner: i64) -> Project {
        let project = Project {
            id: id.to_string(),
            name: id.to_string(),
            token: format!("repo-{id}"),
            default_branch: "main".to_string(),
            base_url: String::new(),
            coverage_rate: 0.0,
            user_id: owner,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_project(&project).unwrap();
        project
    }

    fn report(job_id: Option<&str>) -> CoverageReport {
        let payload = CoverallsPayload::from_json(
            r#"{
                "repo_token": "unused",
                "git": {"branch": "main", "head": {"id": "abc123", "message": "msg"}},
                "source_files": [
                    {"name": "a.rs", "source": "fn a() {}", "coverage": [null, 1, 0, 2]},
                    {"name": "b.rs", "source": "", "coverage": [null, null]}
                ]
            }"#,
        )
        .unwrap();
        let mut report = CoverageReport::from_payload(&payload).unwrap();
        report.job_id = job_id.map(str::to_string);
        report
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = setup();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "users",
            "user_tokens",
            "projects",
            "project_shares",
            "project_tokens",
            "builds",
            "jobs",
            "job_files",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_user_crud() {
        let (_temp, store) = setup();

        let mut user = store
            .create_user(&NewUser {
                email: "dev@example.com".to_string(),
                name: "Dev".to_string(),
                oidc_subject: Some("sub-1".to_string()),
                groups: BTreeSet::from(["eng".to_string()]),
                ..Default::default()
            })
            .unwrap();

        let by_subject = store.get_user_by_subject("sub-1").unwrap().unwrap();
        assert_eq!(by_subject.id, user.id);
        assert!(by_subject.in_group("eng"));

        user.name = "Developer".to_string();
        user.admin = true;
        store.update_user(&user).unwrap();
        let fetched = store.get_user_by_email("dev@example.com").unwrap().unwrap();
        assert_eq!(fetched.name, "Developer");
        assert!(fetched.admin);

        store
            .set_user_groups(user.id, &BTreeSet::from(["ops".to_string()]))
            .unwrap();
        let fetched = store.get_user(user.id).unwrap().unwrap();
        assert!(!fetched.in_group("eng"));
        assert!(fetched.in_group("ops"));

        let duplicate = store.create_user(&NewUser {
            email: "dev@example.com".to_string(),
            ..Default::default()
        });
        assert!(matches!(duplicate, Err(Error::AlreadyExists)));
    }

    #[test]
    fn test_delete_user_transfers_projects() {
        let (_temp, store) = setup();
        let admin = seed_user(&store, "admin@example.com");
        let user = seed_user(&store, "user@example.com");
        seed_project(&store, "p1", user.id);
        seed_project(&store, "p2", user.id);
        store.create_user_token(user.id, "ci", "ut-1").unwrap();

        assert!(store.delete_user_transferring_projects(user.id, admin.id).unwrap());

        for id in ["p1", "p2"] {
            assert_eq!(store.get_project(id).unwrap().unwrap().user_id, admin.id);
        }
        assert!(store.get_user_token_by_token("ut-1").unwrap().is_none());
        assert!(store.get_user(user.id).unwrap().is_none());
        assert!(store.get_user_by_token("legacy-user@example.com").unwrap().is_none());
        assert!(!store.delete_user_transferring_projects(user.id, admin.id).unwrap());

        // the address is free again once the old account is gone
        seed_user(&store, "user@example.com");
    }

    #[test]
    fn test_delete_user_rolls_back_on_failure() {
        let (_temp, store) = setup();
        let admin = seed_user(&store, "admin@example.com");
        let user = seed_user(&store, "user@example.com");
        seed_project(&store, "p1", user.id);
        store.create_user_token(user.id, "ci", "ut-1").unwrap();

        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER block_user_delete BEFORE UPDATE OF deleted_at ON users
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        let result = store.delete_user_transferring_projects(user.id, admin.id);
        assert!(matches!(result, Err(Error::Database(_))));

        assert_eq!(store.get_project("p1").unwrap().unwrap().user_id, user.id);
        assert!(store.get_user_token_by_token("ut-1").unwrap().is_some());
        assert!(store.get_user(user.id).unwrap().is_some());
    }

    #[test]
    fn test_visible_projects() {
        let (_temp, store) = setup();
        let alice = seed_user(&store, "alice@example.com");
        let bob = seed_user(&store, "bob@example.com");
        seed_project(&store, "owned", alice.id);
        seed_project(&store, "shared", bob.id);
        seed_project(&store, "private", bob.id);
        store.create_project_share("shared", "eng").unwrap();

        let ids = |projects: Vec<Project>| {
            let mut ids: Vec<String> = projects.into_iter().map(|p| p.id).collect();
            ids.sort();
            ids
        };

        let none = store
            .list_projects_visible_to(alice.id, &BTreeSet::new())
            .unwrap();
        assert_eq!(ids(none), vec!["owned"]);

        let groups = BTreeSet::from(["eng".to_string(), "x".to_string()]);
        let with_group = store.list_projects_visible_to(alice.id, &groups).unwrap();
        assert_eq!(ids(with_group), vec!["owned", "shared"]);

        assert_eq!(store.list_projects().unwrap().len(), 3);
    }

    #[test]
    fn test_share_is_unique_per_group() {
        let (_temp, store) = setup();
        let user = seed_user(&store, "u@example.com");
        seed_project(&store, "p1", user.id);

        let share = store.create_project_share("p1", "eng").unwrap();
        let again = store.create_project_share("p1", "eng");
        assert!(matches!(again, Err(Error::AlreadyExists)));

        assert!(store.delete_project_share("p1", share.id).unwrap());
        assert!(store.list_project_shares("p1").unwrap().is_empty());
    }

    #[test]
    fn test_tokens_track_last_use() {
        let (_temp, store) = setup();
        let user = seed_user(&store, "u@example.com");
        seed_project(&store, "p1", user.id);

        let ut = store.create_user_token(user.id, "laptop", "ut-1").unwrap();
        assert!(ut.last_used_at.is_none());
        store.touch_user_token(ut.id).unwrap();
        let fetched = store.get_user_token_by_token("ut-1").unwrap().unwrap();
        assert!(fetched.last_used_at.is_some());

        let pt = store.create_project_token("p1", "ci", "pt-1").unwrap();
        store.touch_project_token(pt.id).unwrap();
        let fetched = store.get_project_token_by_token("pt-1").unwrap().unwrap();
        assert!(fetched.last_used_at.is_some());

        let clash = store.create_project_token("p1", "ci2", "pt-1");
        assert!(matches!(clash, Err(Error::AlreadyExists)));

        assert!(!store.delete_project_token("other", pt.id).unwrap());
        assert!(store.delete_project_token("p1", pt.id).unwrap());
    }

    #[test]
    fn test_record_coverage_builds_full_graph() {
        let (_temp, store) = setup();
        let user = seed_user(&store, "u@example.com");
        seed_project(&store, "p1", user.id);

        let first = store.record_coverage("p1", &report(None)).unwrap();
        assert_eq!(first.build.build_num, 1);
        assert_eq!(first.job.job_number, "1.1");
        assert_eq!(first.file_count, 2);

        let second = store.record_coverage("p1", &report(Some("ci-42"))).unwrap();
        assert_eq!(second.build.build_num, 2);
        assert_eq!(second.job.job_number, "ci-42");

        // a.rs: 3 measurable, 2 covered; b.rs: nothing measurable
        let expected = 200.0 / 3.0;
        let build = store.get_build(second.build.id).unwrap().unwrap();
        assert!((build.coverage_rate - expected).abs() < 1e-9);
        let job = store.get_job(second.job.id).unwrap().unwrap();
        assert!((job.coverage_rate - expected).abs() < 1e-9);
        let project = store.get_project("p1").unwrap().unwrap();
        assert!((project.coverage_rate - expected).abs() < 1e-9);

        let files = store.list_job_files(second.job.id).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.rs");
        assert_eq!(files[0].coverage, "[null,1,0,2]");
        assert_eq!(files[1].coverage_rate, 0.0);

        let builds = store.list_builds("p1").unwrap();
        assert_eq!(
            builds.iter().map(|b| b.build_num).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn test_record_coverage_rolls_back_on_failure() {
        let (_temp, store) = setup();
        let user = seed_user(&store, "u@example.com");
        seed_project(&store, "p1", user.id);

        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER block_files BEFORE INSERT ON job_files
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        assert!(store.record_coverage("p1", &report(None)).is_err());
        assert_eq!(count(&store, "builds"), 0);
        assert_eq!(count(&store, "jobs"), 0);
        assert_eq!(count(&store, "job_files"), 0);
    }

    #[test]
    fn test_record_coverage_unknown_project_fails() {
        let (_temp, store) = setup();
        let result = store.record_coverage("missing", &report(None));
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(count(&store, "builds"), 0);
    }

    #[test]
    fn test_concurrent_uploads_get_distinct_build_numbers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");
        let setup_store = SqliteStore::new(&path).unwrap();
        setup_store.initialize().unwrap();
        let user = seed_user(&setup_store, "u@example.com");
        seed_project(&setup_store, "p1", user.id);

        // separate connections so the writers really race
        let stores: Vec<Arc<SqliteStore>> = (0..4)
            .map(|_| Arc::new(SqliteStore::new(&path).unwrap()))
            .collect();

        let handles: Vec<_> = stores
            .iter()
            .cloned()
            .map(|store| {
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| {
                            let recorded = store.record_coverage("p1", &report(None)).unwrap();
                            recorded.build.build_num
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut nums: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        nums.sort();
        assert_eq!(nums, (1..=20).collect::<Vec<_>>());
    }
}
