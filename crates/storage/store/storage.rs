//! File-state table and lease bookkeeping for the pull protocol.
//!
//! The `Store` facade hides the engine behind a narrow trait so the HTTP
//! layer never touches the synchronization; the in-memory engine serializes
//! every operation on a single lock, which is what makes lease, confirm and
//! the TTL sweep linearizable per file id.

mod engines;
pub mod error;

use engines::api::StoreEngine;
use engines::in_memory::Store as InMemoryStore;
use error::StoreError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type FileId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Leased,
    Downloaded,
    Failed,
}

/// One child file tracked by the pull service.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub id: FileId,
    pub pv: String,
    pub name: String,
    /// Batch directory name (`NSA_<nsa>`).
    pub lote: String,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub status: FileStatus,
    pub lease_id: Option<String>,
}

/// Registration payload for a freshly indexed child.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub pv: String,
    pub name: String,
    pub lote: String,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct LeaseGrant {
    pub lease_id: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfirmSummary {
    pub confirmed: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    InMemory,
}

#[derive(Debug, Clone)]
pub struct Store {
    engine: Arc<dyn StoreEngine>,
}

impl Store {
    pub fn new(engine_type: EngineType) -> Self {
        match engine_type {
            EngineType::InMemory => Store {
                engine: Arc::new(InMemoryStore::new()),
            },
        }
    }

    /// Registers a child file, idempotent on (lote, name). Re-registering
    /// with a different digest resets a non-leased entry to pending so the
    /// regenerated content gets delivered again.
    pub fn register_file(&self, file: NewFile) -> Result<FileId, StoreError> {
        self.engine.register_file(file)
    }

    /// Atomically reserves up to `limit` pending files, optionally filtered
    /// by lote prefix, ordered by (pv, name). Never blocks; returns an
    /// empty grant when nothing is pending.
    pub fn lease_files(
        &self,
        limit: usize,
        lotes: &[String],
        ttl: Duration,
    ) -> Result<LeaseGrant, StoreError> {
        self.engine.lease_files(limit, lotes, ttl)
    }

    /// Resolves a lease. Ids outside the lease are counted as rejected;
    /// leased ids named in neither list (cancelled downloads) return to
    /// pending. Replaying the same outcome is a no-op, a different outcome
    /// is an error.
    pub fn confirm(
        &self,
        lease_id: &str,
        ok_ids: &[FileId],
        fail_ids: &[FileId],
    ) -> Result<ConfirmSummary, StoreError> {
        self.engine.confirm(lease_id, ok_ids, fail_ids)
    }

    /// Releases every open lease whose deadline has passed, returning the
    /// files to pending, and retires closed leases past their deadline so
    /// the table stays bounded. Returns how many files were released.
    pub fn expire_leases(&self, now: Instant) -> Result<usize, StoreError> {
        self.engine.expire_leases(now)
    }

    /// Direct-download path: selects like `lease_files` but marks the
    /// entries downloaded immediately.
    pub fn take_batch(&self, limit: usize, lotes: &[String]) -> Result<Vec<FileEntry>, StoreError> {
        self.engine.take_batch(limit, lotes)
    }

    /// Operator retry: every failed file goes back to pending.
    pub fn retry_failed(&self) -> Result<usize, StoreError> {
        self.engine.retry_failed()
    }

    pub fn get_file(&self, id: FileId) -> Result<Option<FileEntry>, StoreError> {
        self.engine.get_file(id)
    }

    pub fn snapshot(&self) -> Result<Vec<FileEntry>, StoreError> {
        self.engine.snapshot()
    }
}
