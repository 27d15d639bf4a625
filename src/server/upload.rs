use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::auth::RequireAuth;
use crate::coverage::{CoverallsPayload, IngestReceipt, ingest, ingest_into};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::UploadResponse;
use crate::server::response::{ApiError, StoreResultExt};

const UPLOAD_MESSAGE: &str = "Coverage uploaded successfully";

/// A Coveralls document taken from a raw JSON body, or from the `json`
/// field of a urlencoded or multipart form (`json_file` in multipart too).
pub struct CoverallsUpload(pub CoverallsPayload);

#[derive(Deserialize)]
struct JsonField {
    json: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ApiError {
    ApiError::from(Error::InvalidPayload(msg.into()))
}

fn from_form(bytes: &[u8]) -> Option<Result<CoverallsPayload, Error>> {
    let field = serde_urlencoded::from_bytes::<JsonField>(bytes).ok()?.json?;
    Some(CoverallsPayload::from_json(&field))
}

impl<S: Send + Sync> FromRequest<S> for CoverallsUpload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| invalid(e.body_text()))?;

            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| invalid(e.body_text()))?
            {
                if matches!(field.name(), Some("json" | "json_file")) {
                    let bytes = field.bytes().await.map_err(|e| invalid(e.body_text()))?;
                    return Ok(Self(CoverallsPayload::from_slice(&bytes)?));
                }
            }
            return Err(invalid("missing json field"));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| invalid(e.body_text()))?;

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let payload = from_form(&bytes).ok_or_else(|| invalid("missing json field"))??;
            return Ok(Self(payload));
        }

        // Clients do not always label the body; fall back to a form field
        // before giving up.
        match CoverallsPayload::from_slice(&bytes) {
            Ok(payload) => Ok(Self(payload)),
            Err(err) => match from_form(&bytes) {
                Some(Ok(payload)) => Ok(Self(payload)),
                _ => Err(err.into()),
            },
        }
    }
}

fn upload_response(receipt: IngestReceipt) -> UploadResponse {
    UploadResponse {
        message: UPLOAD_MESSAGE,
        project_id: receipt.project_id,
        build_id: receipt.build_id,
        build_num: receipt.build_num,
        job_id: receipt.job_id,
        job_number: receipt.job_number,
        coverage_rate: receipt.coverage_rate,
    }
}

/// Coveralls-compatible endpoint; the payload's `repo_token` is the only
/// credential.
pub async fn upload_v2(
    State(state): State<Arc<AppState>>,
    CoverallsUpload(payload): CoverallsUpload,
) -> impl IntoResponse {
    let receipt = ingest(state.store.as_ref(), &payload).map_err(|e| match e {
        Error::InvalidToken => ApiError::unauthorized("Invalid repo token"),
        e => ApiError::from(e),
    })?;

    Ok::<_, ApiError>(Json(upload_response(receipt)))
}

/// Upload on behalf of an authenticated principal. A project token may omit
/// `repo_token`; otherwise the named project must be one the caller manages.
pub async fn upload_authenticated(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    CoverallsUpload(payload): CoverallsUpload,
) -> impl IntoResponse {
    let project = match payload.repo_token() {
        Some(token) => state
            .store
            .get_project_by_token(token)
            .api_err("Failed to get project")?
            .ok_or_else(|| ApiError::unauthorized("Invalid repo token"))?,
        None => principal
            .project
            .clone()
            .ok_or_else(|| invalid("repo_token is required"))?,
    };

    if !principal.can_manage(&project) {
        return Err(ApiError::forbidden("Not allowed to upload to this project"));
    }

    let receipt = ingest_into(state.store.as_ref(), &project, &payload)?;
    Ok::<_, ApiError>(Json(upload_response(receipt)))
}
