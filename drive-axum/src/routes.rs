use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use drive_blob::{
    ChunkProgress, DriveEntry, FileId, FileMeta, FileStatus, FolderSummary, SessionToken, TransferError,
    UploadPlan, UploadRequest, UploadSession,
};

use crate::headers::{
    content_disposition, header_str, range_from_headers, transfer_ctx, RequestCtx, FILE_NAME_HEADER,
    FOLDER_HEADER,
};
use crate::token::IssuedToken;
use crate::{DriveAxumError, TransferState};

/// Client-facing projection of an upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_token: SessionToken,
    pub file_id: FileId,
    pub status: String,
    pub received: u32,
    pub total_chunks: u32,
    pub missing: Vec<u32>,
    pub total_size: u64,
    pub chunk_size: u64,
}

impl From<UploadSession> for SessionView {
    fn from(session: UploadSession) -> Self {
        Self {
            status: session.status.label().to_string(),
            received: session.received_count(),
            missing: session.missing_chunks(),
            total_chunks: session.total_chunks,
            total_size: session.total_size,
            chunk_size: session.chunk_size,
            session_token: session.token,
            file_id: session.file_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub folder: Option<String>,
}

pub fn transfer_router(state: TransferState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/uploads", post(create_upload))
        .route("/uploads/{token}", get(get_upload).delete(abort_upload))
        .route("/uploads/{token}/chunks/{index}", put(put_chunk))
        .route("/files", post(upload_file).get(list_files))
        .route("/folders", post(create_folder))
        .route("/files/{file_id}/upload", get(file_upload))
        .route("/files/{file_id}/download-token", post(issue_download_token))
        .route("/download/{token}", get(download))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_upload(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UploadPlan>), DriveAxumError> {
    let Json(request) =
        body.map_err(|rejection| DriveAxumError::bad_request(rejection.body_text()))?;
    let plan = state.adapter.begin_upload(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn put_chunk(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Path((token, index)): Path<(String, u32)>,
    body: Bytes,
) -> Result<Json<ChunkProgress>, DriveAxumError> {
    let progress = state
        .adapter
        .upload_chunk(&ctx, &SessionToken::new(token), index, body)
        .await?;
    Ok(Json(progress))
}

async fn get_upload(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Path(token): Path<String>,
) -> Result<Json<SessionView>, DriveAxumError> {
    let session = state.adapter.session(&ctx, &SessionToken::new(token)).await?;
    Ok(Json(session.into()))
}

async fn abort_upload(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Path(token): Path<String>,
) -> Result<StatusCode, DriveAxumError> {
    state
        .adapter
        .abort_upload(&ctx, &SessionToken::new(token))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn file_upload(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Path(file_id): Path<String>,
) -> Result<Json<SessionView>, DriveAxumError> {
    let session = state.adapter.session_for_file(&ctx, &FileId::new(file_id)).await?;
    Ok(Json(session.into()))
}

async fn upload_file(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<FileMeta>), DriveAxumError> {
    let file_name = header_str(&headers, FILE_NAME_HEADER)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| DriveAxumError::bad_request("Missing x-file-name header"))?;
    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string);
    let folder_id = header_str(&headers, FOLDER_HEADER).map(str::to_string);

    let meta = state
        .adapter
        .upload_whole(&ctx, file_name, content_type, folder_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(meta)))
}

async fn list_files(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DriveEntry>>, DriveAxumError> {
    let entries = state.adapter.list_entries(&ctx, query.folder.as_deref()).await?;
    Ok(Json(entries))
}

async fn create_folder(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    body: Result<Json<NewFolder>, JsonRejection>,
) -> Result<(StatusCode, Json<FolderSummary>), DriveAxumError> {
    let Json(folder) =
        body.map_err(|rejection| DriveAxumError::bad_request(rejection.body_text()))?;
    let created = state
        .adapter
        .create_folder(&ctx, &folder.name, folder.parent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn issue_download_token(
    State(state): State<TransferState>,
    RequestCtx(ctx): RequestCtx,
    Path(file_id): Path<String>,
) -> Result<Json<IssuedToken>, DriveAxumError> {
    let meta = state.adapter.file_meta(&ctx, &FileId::new(file_id)).await?;
    if meta.status != FileStatus::Uploaded {
        return Err(TransferError::NotReady {
            file_id: meta.file_id.to_string(),
        }
        .into());
    }
    Ok(Json(state.tokens.issue(&meta)?))
}

/// Stream a file (or a byte range of it) named by a download token.
///
/// The token is the caller's identity here; no owner header is needed.
async fn download(
    State(state): State<TransferState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, DriveAxumError> {
    let claims = state.tokens.verify(&token)?;
    let ctx = transfer_ctx(&headers, &state, claims.owner_id.clone());
    let range = range_from_headers(&headers);

    let (meta, download) = state.adapter.download(&ctx, &claims.file_id, range).await?;

    let status = StatusCode::from_u16(download.status()).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, download.content_length())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, meta.content_type.as_str())
        .header(header::CONTENT_DISPOSITION, content_disposition(&meta.file_name));
    if let Some(content_range) = download.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    let response = builder
        .body(Body::from_stream(download.into_body()))
        .map_err(|e| DriveAxumError::from(anyhow::Error::new(e)))?;
    Ok(response.into_response())
}
