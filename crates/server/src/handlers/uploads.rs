//! Upload staging endpoints.
//!
//! Files are uploaded in consecutive chunks of arbitrary size: each
//! `POST /upload/{id}` appends one fragment. A failed chunk is rolled
//! back with `DELETE /upload/{id}/last` and sent again. The staged file
//! is read back as a single unit from `/upload/{id}/content` until an
//! external bundler promotes it to tape.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::Query;
use bytes::Bytes;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use stacks_fragment::{FileMeta, FragmentError, StagedFile};
use stacks_storage::COPY_CHUNK_SIZE;
use std::sync::Arc;

/// Fragment checksum header, hex MD5 of the request body.
const UPLOAD_MD5_HEADER: &str = "x-upload-md5";

async fn lookup_file(state: &AppState, id: &str) -> ApiResult<Arc<StagedFile>> {
    state
        .fragments
        .lookup(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no staged file: {id}")))
}

/// POST /upload/{id} - append the request body as one fragment,
/// creating the staged file on first use.
pub async fn append_fragment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    // verify the chunk before touching storage when the client sent a
    // checksum along
    if let Some(value) = headers.get(UPLOAD_MD5_HEADER) {
        let want = value
            .to_str()
            .ok()
            .and_then(|s| hex::decode(s).ok())
            .ok_or_else(|| ApiError::BadRequest("malformed x-upload-md5 header".to_string()))?;
        let got = Md5::digest(&body);
        if got.as_slice() != want.as_slice() {
            return Err(ApiError::ChecksumMismatch {
                expected: hex::encode(&want),
                actual: hex::encode(got),
            });
        }
    }

    let file = match state.fragments.lookup(&id).await {
        Some(file) => file,
        None => match state.fragments.create(&id).await {
            Ok(file) => file,
            // lost a create race; the other winner's file is fine
            Err(FragmentError::AlreadyExists(_)) => lookup_file(&state, &id).await?,
            Err(e) => return Err(e.into()),
        },
    };

    let mut writer = file.append().await?;
    if !body.is_empty() {
        writer.write(body).await?;
    }
    writer.finish().await?;

    let meta = file.meta().await;
    Ok((StatusCode::CREATED, Json(meta)).into_response())
}

/// GET /upload/{id} - staged file metadata.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FileMeta>> {
    let file = lookup_file(&state, &id).await?;
    Ok(Json(file.meta().await))
}

/// GET /upload/{id}/content - the concatenation of all fragments.
pub async fn get_upload_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let file = lookup_file(&state, &id).await?;
    let size = file.meta().await.size;
    let mut reader = file.open().await;

    let stream = async_stream::stream! {
        loop {
            match reader.read(COPY_CHUNK_SIZE).await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => yield Ok::<_, std::io::Error>(chunk),
                Err(e) => {
                    yield Err(std::io::Error::other(e.to_string()));
                    break;
                }
            }
        }
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// DELETE /upload/{id} - drop the staged file and its fragments.
/// Unknown ids are fine.
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.fragments.delete(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /upload/{id}/last - roll back the trailing fragment.
pub async fn rollback_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let file = lookup_file(&state, &id).await?;
    file.rollback().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /upload/{id}/labels - replace the file's labels.
pub async fn set_upload_labels(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(labels): Json<Vec<String>>,
) -> ApiResult<Json<FileMeta>> {
    state.fragments.set_labels(&id, &labels).await?;
    let file = lookup_file(&state, &id).await?;
    Ok(Json(file.meta().await))
}

/// Mutable staged-file attributes. Hashes are hex encoded on the wire.
#[derive(Debug, Deserialize)]
pub struct UpdateUploadRequest {
    pub creator: Option<String>,
    pub extra: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

fn decode_hash(field: &str, value: &str) -> ApiResult<Vec<u8>> {
    hex::decode(value).map_err(|_| ApiError::BadRequest(format!("malformed hex in {field}")))
}

/// PUT /upload/{id}/metadata - set creator, extra payload, and/or the
/// whole-file checksums.
pub async fn update_upload_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<UpdateUploadRequest>,
) -> ApiResult<Json<FileMeta>> {
    let file = lookup_file(&state, &id).await?;
    if let Some(creator) = &update.creator {
        file.set_creator(creator).await?;
    }
    if let Some(extra) = &update.extra {
        file.set_extra(extra).await?;
    }
    if let Some(md5) = &update.md5 {
        file.set_md5(decode_hash("md5", md5)?).await?;
    }
    if let Some(sha256) = &update.sha256 {
        file.set_sha256(decode_hash("sha256", sha256)?).await?;
    }
    Ok(Json(file.meta().await))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub ok: bool,
}

/// POST /upload/{id}/verify - stream-hash the staged content and check
/// it against the recorded checksums.
pub async fn verify_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerifyResponse>> {
    let file = lookup_file(&state, &id).await?;
    let ok = file.verify().await?;
    Ok(Json(VerifyResponse { ok }))
}

#[derive(Debug, Deserialize)]
pub struct ListUploadsQuery {
    /// Repeated `label=` parameters; listed files must carry all of
    /// them.
    #[serde(default)]
    pub label: Vec<String>,
}

/// GET /uploads?label=a&label=b - ids of staged files, optionally
/// filtered by label.
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<ListUploadsQuery>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.fragments.list_filtered(&query.label).await))
}
