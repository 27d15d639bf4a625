use serde::Serialize;

use super::payload::CoverallsPayload;
use super::rate::LineTally;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Build, Job, Project};

/// One source file ready to be persisted.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub name: String,
    pub source: String,
    pub coverage_json: String,
    pub coverage_rate: f64,
}

/// Everything the store needs to record one job of one build.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    pub branch: String,
    pub commit_sha: String,
    pub commit_msg: String,
    pub job_id: Option<String>,
    pub files: Vec<FileReport>,
    pub tally: LineTally,
}

impl CoverageReport {
    pub fn from_payload(payload: &CoverallsPayload) -> Result<Self> {
        let mut tally = LineTally::default();
        let mut files = Vec::with_capacity(payload.source_files.len());

        for file in &payload.source_files {
            let file_tally = LineTally::from_lines(&file.coverage);
            tally += file_tally;

            let coverage_json = serde_json::to_string(&file.coverage)
                .map_err(|e| Error::InvalidPayload(e.to_string()))?;

            files.push(FileReport {
                name: file.name.clone(),
                source: file.source.clone(),
                coverage_json,
                coverage_rate: file_tally.rate(),
            });
        }

        Ok(Self {
            branch: payload.branch().to_string(),
            commit_sha: payload.commit_sha().to_string(),
            commit_msg: payload.commit_message().to_string(),
            job_id: payload.job_id().map(str::to_string),
            files,
            tally,
        })
    }

    #[must_use]
    pub fn coverage_rate(&self) -> f64 {
        self.tally.rate()
    }

    /// The caller's job identifier, or `"{build_num}.1"` when none was given.
    #[must_use]
    pub fn job_number(&self, build_num: i64) -> String {
        match &self.job_id {
            Some(id) => id.clone(),
            None => format!("{build_num}.1"),
        }
    }
}

/// Rows written by [`Store::record_coverage`].
#[derive(Debug, Clone)]
pub struct RecordedCoverage {
    pub build: Build,
    pub job: Job,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub project_id: String,
    pub build_id: i64,
    pub build_num: i64,
    pub job_id: i64,
    pub job_number: String,
    pub coverage_rate: f64,
}

/// Resolves the project by the payload's `repo_token` and records the upload.
pub fn ingest(store: &dyn Store, payload: &CoverallsPayload) -> Result<IngestReceipt> {
    let token = payload
        .repo_token()
        .ok_or_else(|| Error::InvalidPayload("repo_token is required".to_string()))?;

    let project = store
        .get_project_by_token(token)?
        .ok_or(Error::InvalidToken)?;

    ingest_into(store, &project, payload)
}

/// Records the upload against an already resolved project.
pub fn ingest_into(
    store: &dyn Store,
    project: &Project,
    payload: &CoverallsPayload,
) -> Result<IngestReceipt> {
    let report = CoverageReport::from_payload(payload)?;
    let recorded = store.record_coverage(&project.id, &report)?;

    tracing::info!(
        project_id = %project.id,
        build_num = recorded.build.build_num,
        job_number = %recorded.job.job_number,
        files = recorded.file_count,
        coverage_rate = recorded.job.coverage_rate,
        "coverage ingested"
    );

    Ok(IngestReceipt {
        project_id: project.id.clone(),
        build_id: recorded.build.id,
        build_num: recorded.build.build_num,
        job_id: recorded.job.id,
        job_number: recorded.job.job_number,
        coverage_rate: recorded.job.coverage_rate,
    })
}
