//! Directory snapshot for dashboards and for agents narrowing their pull by
//! batch age. Scanning also re-indexes the output tree.

use crate::utils::{authorize, AuthHeader, RpcErr};
use crate::{indexer, ApiContext};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Serialize)]
pub struct InputEntry {
    pub name: String,
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug, Serialize)]
pub struct OutputEntry {
    pub name: String,
    pub lote: String,
    pub mtime: u64,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub input: Vec<InputEntry>,
    pub output: Vec<OutputEntry>,
}

fn mtime_secs(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub async fn scan(
    State(ctx): State<ApiContext>,
    auth: AuthHeader,
) -> Result<Json<ScanResponse>, RpcErr> {
    authorize(&ctx, &auth)?;
    indexer::index_output(&ctx.store, &ctx.config.output_root)?;

    let mut input = Vec::new();
    if let Some(input_dir) = &ctx.config.input_dir {
        if input_dir.exists() {
            for entry in fs::read_dir(input_dir)? {
                let entry = entry?;
                if !entry.path().is_file() {
                    continue;
                }
                input.push(InputEntry {
                    name: entry.file_name().to_string_lossy().to_string(),
                    size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                    mtime: mtime_secs(&entry.path()),
                });
            }
        }
    }
    input.sort_by(|a, b| a.name.cmp(&b.name));

    let mut output: Vec<OutputEntry> = ctx
        .store
        .snapshot()?
        .into_iter()
        .map(|entry| OutputEntry {
            mtime: mtime_secs(&entry.path),
            name: entry.name,
            lote: entry.lote,
        })
        .collect();
    output.sort_by(|a, b| (&a.lote, &a.name).cmp(&(&b.lote, &b.name)));

    Ok(Json(ScanResponse { input, output }))
}
