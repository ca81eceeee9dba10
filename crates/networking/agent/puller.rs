//! The pull cycle: lease, stream each child to disk, verify, confirm.
//!
//! Downloads land in `recebidos/<pv>/.<name>.part` and are renamed into
//! place only after size and digest checks pass, so a crash mid-transfer
//! leaves no half-file behind and a re-leased duplicate just renames over
//! identical bytes. Confirm is always sent, even with empty lists, to
//! release the lease.

use crate::client::{FileDescriptor, SplitterClient};
use crate::config::{AgentConfig, DownloadMode};
use crate::error::AgentError;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Per-invocation overrides on top of the agent configuration.
#[derive(Debug, Clone, Default)]
pub struct PullRequest {
    pub limit: Option<usize>,
    pub mode: Option<DownloadMode>,
    pub lotes: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub since_days: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PullSummary {
    pub offered: usize,
    pub downloaded: usize,
    pub failed: usize,
}

pub async fn run_cycle(config: &AgentConfig) -> Result<PullSummary, AgentError> {
    run_cycle_with(config, PullRequest::default()).await
}

pub async fn run_cycle_with(
    config: &AgentConfig,
    request: PullRequest,
) -> Result<PullSummary, AgentError> {
    let client = SplitterClient::new(&config.splitter_base_url, config.splitter_api_key.clone());
    let limit = request.limit.unwrap_or(config.pull_limit);
    let mode = match request.mode.unwrap_or(config.download_mode) {
        DownloadMode::Zip => {
            warn!("zip download mode is deprecated; running a lease cycle instead");
            DownloadMode::Lease
        }
        other => other,
    };

    let mut lotes = request.lotes.clone();
    if request.date_from.is_some() || request.date_to.is_some() || request.since_days.is_some() {
        lotes = filter_lotes_by_date(&client, &request, lotes).await?;
        if lotes.is_empty() {
            info!("no batch matches the date filters, nothing to pull");
            return Ok(PullSummary::default());
        }
    }

    let received = config.received_dir();
    match mode {
        DownloadMode::Lease | DownloadMode::Zip => {
            lease_cycle(config, &client, limit, &lotes, &received).await
        }
        DownloadMode::Direct => direct_cycle(config, &client, limit, &lotes, &received).await,
    }
}

async fn lease_cycle(
    config: &AgentConfig,
    client: &SplitterClient,
    limit: usize,
    lotes: &[String],
    received: &Path,
) -> Result<PullSummary, AgentError> {
    let lease = client
        .lease_files(limit, lotes, config.lease_ttl_seconds)
        .await?;
    info!(lease = %lease.lease_id, files = lease.files.len(), "lease acquired");

    let mut ok_ids = Vec::new();
    let mut fail_ids = Vec::new();
    for file in &lease.files {
        match fetch_one(client, file, received, config.verify_sha256).await {
            Ok(()) => ok_ids.push(file.id),
            Err(err) => {
                warn!(file = %file.name, %err, "download failed");
                fail_ids.push(file.id);
            }
        }
    }

    // even an empty confirm releases the lease
    let confirmation = client.confirm(&lease.lease_id, &ok_ids, &fail_ids).await?;
    info!(
        confirmed = confirmation.confirmed,
        rejected = confirmation.rejected,
        "lease confirmed"
    );
    Ok(PullSummary {
        offered: lease.files.len(),
        downloaded: ok_ids.len(),
        failed: fail_ids.len(),
    })
}

async fn direct_cycle(
    config: &AgentConfig,
    client: &SplitterClient,
    limit: usize,
    lotes: &[String],
    received: &Path,
) -> Result<PullSummary, AgentError> {
    let batch = client.pull_batch(limit, lotes).await?;
    info!(files = batch.files.len(), "direct batch received");

    let mut summary = PullSummary {
        offered: batch.files.len(),
        ..Default::default()
    };
    for file in &batch.files {
        match fetch_one(client, file, received, config.verify_sha256).await {
            Ok(()) => summary.downloaded += 1,
            Err(err) => {
                warn!(file = %file.name, %err, "download failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Downloads one descriptor with bounded retries. Any verification failure
/// deletes the partial file before the next attempt.
async fn fetch_one(
    client: &SplitterClient,
    file: &FileDescriptor,
    received: &Path,
    verify_sha256: bool,
) -> Result<(), AgentError> {
    let pv_dir = received.join(&file.pv);
    tokio::fs::create_dir_all(&pv_dir).await?;
    let part = pv_dir.join(format!(".{}.part", file.name));
    let final_path = pv_dir.join(&file.name);

    let mut last_err = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match try_fetch(client, file, &part, &final_path, verify_sha256).await {
            Ok(()) => {
                info!(file = %file.name, attempt, "downloaded");
                return Ok(());
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                warn!(file = %file.name, attempt, %err, "attempt failed");
                last_err = Some(err);
                if attempt < DOWNLOAD_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| AgentError::Integrity {
        name: file.name.clone(),
        reason: "download failed".to_string(),
    }))
}

async fn try_fetch(
    client: &SplitterClient,
    file: &FileDescriptor,
    part: &Path,
    final_path: &Path,
    verify_sha256: bool,
) -> Result<(), AgentError> {
    let written = client.download_to(&file.url, part).await?;

    if let Some(size) = file.size {
        if written != size {
            return Err(AgentError::Integrity {
                name: file.name.clone(),
                reason: format!("size mismatch: expected {size}, wrote {written}"),
            });
        }
    }
    if verify_sha256 {
        if let Some(expected) = &file.sha256 {
            let digest = hex::encode(Sha256::digest(tokio::fs::read(part).await?));
            if digest != expected.to_lowercase() {
                return Err(AgentError::Integrity {
                    name: file.name.clone(),
                    reason: format!("sha256 mismatch: expected {expected}, got {digest}"),
                });
            }
        }
    }

    tokio::fs::rename(part, final_path).await?;
    Ok(())
}

/// Narrows the lote list using the batch mtimes reported by `/scan`.
async fn filter_lotes_by_date(
    client: &SplitterClient,
    request: &PullRequest,
    lotes: Vec<String>,
) -> Result<Vec<String>, AgentError> {
    let now = chrono::Utc::now().timestamp();
    let from = request
        .since_days
        .map(|days| now - (days as i64) * 86_400)
        .or_else(|| {
            request
                .date_from
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp())
        });
    let to = request
        .date_to
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc().timestamp());

    let scan = client.scan().await?;
    let mut matching: Vec<String> = Vec::new();
    for entry in scan.output {
        let mtime = entry.mtime as i64;
        if from.is_some_and(|f| mtime < f) || to.is_some_and(|t| mtime > t) {
            continue;
        }
        if !lotes.is_empty() && !lotes.iter().any(|l| entry.lote.starts_with(l.as_str())) {
            continue;
        }
        if !matching.contains(&entry.lote) {
            matching.push(entry.lote);
        }
    }
    Ok(matching)
}
