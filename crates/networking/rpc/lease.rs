//! Lease, confirm and direct-batch handlers, plus the streamed child
//! download the descriptors point at.

use crate::utils::{authorize, AuthHeader, RpcErr};
use crate::ApiContext;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use rede_splitter_storage::{FileEntry, FileId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    pub limit: Option<usize>,
    #[serde(default)]
    pub lotes: Vec<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct FileDescriptor {
    pub id: FileId,
    pub pv: String,
    pub name: String,
    pub size: u64,
    pub sha256: String,
    pub url: String,
}

impl From<FileEntry> for FileDescriptor {
    fn from(entry: FileEntry) -> Self {
        FileDescriptor {
            url: format!("/files/{}", entry.id),
            id: entry.id,
            pv: entry.pv,
            name: entry.name,
            size: entry.size,
            sha256: entry.sha256,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub lease_id: String,
    pub files: Vec<FileDescriptor>,
}

pub async fn lease_files(
    State(ctx): State<ApiContext>,
    auth: AuthHeader,
    Json(req): Json<LeaseRequest>,
) -> Result<Json<LeaseResponse>, RpcErr> {
    authorize(&ctx, &auth)?;
    let limit = req
        .limit
        .filter(|l| *l > 0)
        .ok_or_else(|| RpcErr::BadParams("limit must be a positive integer".to_string()))?;
    let ttl = req
        .ttl_seconds
        .filter(|t| *t > 0)
        .ok_or_else(|| RpcErr::BadParams("ttl_seconds must be a positive integer".to_string()))?;

    let grant = ctx
        .store
        .lease_files(limit, &req.lotes, Duration::from_secs(ttl))?;
    info!(lease = %grant.lease_id, files = grant.files.len(), "lease requested");
    Ok(Json(LeaseResponse {
        lease_id: grant.lease_id,
        files: grant.files.into_iter().map(FileDescriptor::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub lease_id: String,
    #[serde(default)]
    pub ok_ids: Vec<FileId>,
    #[serde(default)]
    pub fail_ids: Vec<FileId>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub confirmed: usize,
    pub rejected: usize,
}

pub async fn confirm_download(
    State(ctx): State<ApiContext>,
    auth: AuthHeader,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, RpcErr> {
    authorize(&ctx, &auth)?;
    let summary = ctx
        .store
        .confirm(&req.lease_id, &req.ok_ids, &req.fail_ids)?;
    Ok(Json(ConfirmResponse {
        confirmed: summary.confirmed,
        rejected: summary.rejected,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PullBatchRequest {
    pub limit: Option<usize>,
    #[serde(default)]
    pub lotes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PullBatchResponse {
    pub files: Vec<FileDescriptor>,
}

/// Direct mode: the selection is marked downloaded as it is handed out, no
/// confirm step. At-most-once is the caller's problem here.
pub async fn pull_batch(
    State(ctx): State<ApiContext>,
    auth: AuthHeader,
    Json(req): Json<PullBatchRequest>,
) -> Result<Json<PullBatchResponse>, RpcErr> {
    authorize(&ctx, &auth)?;
    let limit = req
        .limit
        .filter(|l| *l > 0)
        .ok_or_else(|| RpcErr::BadParams("limit must be a positive integer".to_string()))?;
    let files = ctx.store.take_batch(limit, &req.lotes)?;
    info!(files = files.len(), "batch handed out");
    Ok(Json(PullBatchResponse {
        files: files.into_iter().map(FileDescriptor::from).collect(),
    }))
}

/// Streams one child's bytes. Re-downloads are allowed in any state; the
/// agent's rename-into-place keeps duplicates harmless.
pub async fn download_file(
    State(ctx): State<ApiContext>,
    auth: AuthHeader,
    Path(id): Path<FileId>,
) -> Result<Response, RpcErr> {
    authorize(&ctx, &auth)?;
    let entry = ctx
        .store
        .get_file(id)?
        .ok_or_else(|| RpcErr::NotFound(format!("file {id}")))?;

    let file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|err| RpcErr::Internal(format!("cannot open {}: {err}", entry.name)))?;
    let stream = ReaderStream::new(file);

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, entry.size)
        .body(Body::from_stream(stream))
        .map_err(|err| RpcErr::Internal(err.to_string()))
}
