use crate::error::StoreError;
use crate::{ConfirmSummary, FileEntry, FileId, FileStatus, LeaseGrant, NewFile};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::api::StoreEngine;

#[derive(Default, Clone)]
pub struct Store(Arc<Mutex<StoreInner>>);

#[derive(Default, Debug)]
struct StoreInner {
    next_id: FileId,
    files: BTreeMap<FileId, FileEntry>,
    // (lote, name) -> id, the registration identity
    keys: HashMap<(String, String), FileId>,
    leases: HashMap<String, Lease>,
}

#[derive(Debug)]
struct Lease {
    file_ids: BTreeSet<FileId>,
    deadline: Instant,
    outcome: Option<LeaseOutcome>,
}

#[derive(Debug, PartialEq, Eq)]
struct LeaseOutcome {
    ok: BTreeSet<FileId>,
    fail: BTreeSet<FileId>,
    summary: ConfirmSummary,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn matches_lotes(entry: &FileEntry, lotes: &[String]) -> bool {
    lotes.is_empty() || lotes.iter().any(|l| entry.lote.starts_with(l.as_str()))
}

/// Pending entries ordered by (pv, name), capped at `limit`.
fn select_pending(inner: &StoreInner, limit: usize, lotes: &[String]) -> Vec<FileId> {
    let mut candidates: Vec<(&String, &String, FileId)> = inner
        .files
        .values()
        .filter(|e| e.status == FileStatus::Pending && matches_lotes(e, lotes))
        .map(|e| (&e.pv, &e.name, e.id))
        .collect();
    candidates.sort();
    candidates.into_iter().take(limit).map(|(_, _, id)| id).collect()
}

impl StoreEngine for Store {
    fn register_file(&self, file: NewFile) -> Result<FileId, StoreError> {
        let mut inner = self.inner();
        let key = (file.lote.clone(), file.name.clone());
        if let Some(id) = inner.keys.get(&key).copied() {
            let entry = inner
                .files
                .get_mut(&id)
                .ok_or_else(|| StoreError::Custom(format!("dangling file key for id {id}")))?;
            let changed = entry.sha256 != file.sha256 || entry.size != file.size;
            entry.path = file.path;
            entry.size = file.size;
            entry.sha256 = file.sha256;
            if changed && entry.status != FileStatus::Leased {
                entry.status = FileStatus::Pending;
                entry.lease_id = None;
            }
            return Ok(id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.files.insert(
            id,
            FileEntry {
                id,
                pv: file.pv,
                name: file.name,
                lote: file.lote,
                path: file.path,
                size: file.size,
                sha256: file.sha256,
                status: FileStatus::Pending,
                lease_id: None,
            },
        );
        inner.keys.insert(key, id);
        Ok(id)
    }

    fn lease_files(
        &self,
        limit: usize,
        lotes: &[String],
        ttl: Duration,
    ) -> Result<LeaseGrant, StoreError> {
        let mut inner = self.inner();
        let selected = select_pending(&inner, limit, lotes);

        let lease_id = format!("{:016x}", rand::random::<u64>());
        let deadline = Instant::now() + ttl;

        let mut files = Vec::with_capacity(selected.len());
        for id in &selected {
            let entry = inner
                .files
                .get_mut(id)
                .ok_or_else(|| StoreError::Custom(format!("selected file {id} vanished")))?;
            entry.status = FileStatus::Leased;
            entry.lease_id = Some(lease_id.clone());
            files.push(entry.clone());
        }
        inner.leases.insert(
            lease_id.clone(),
            Lease {
                file_ids: selected.into_iter().collect(),
                deadline,
                outcome: None,
            },
        );

        info!(lease = %lease_id, files = files.len(), "lease granted");
        Ok(LeaseGrant { lease_id, files })
    }

    fn confirm(
        &self,
        lease_id: &str,
        ok_ids: &[FileId],
        fail_ids: &[FileId],
    ) -> Result<ConfirmSummary, StoreError> {
        let mut inner = self.inner();
        let requested_ok: BTreeSet<FileId> = ok_ids.iter().copied().collect();
        let requested_fail: BTreeSet<FileId> = fail_ids.iter().copied().collect();

        let lease = inner
            .leases
            .get(lease_id)
            .ok_or_else(|| StoreError::UnknownLease(lease_id.to_string()))?;

        if let Some(outcome) = &lease.outcome {
            if outcome.ok == requested_ok && outcome.fail == requested_fail {
                return Ok(outcome.summary);
            }
            return Err(StoreError::ConflictingConfirm(lease_id.to_string()));
        }

        let leased_ids = lease.file_ids.clone();
        let mut summary = ConfirmSummary::default();
        for (ids, target) in [
            (&requested_ok, FileStatus::Downloaded),
            (&requested_fail, FileStatus::Failed),
        ] {
            for id in ids {
                if !leased_ids.contains(id) {
                    summary.rejected += 1;
                    continue;
                }
                if let Some(entry) = inner.files.get_mut(id) {
                    entry.status = target;
                    entry.lease_id = None;
                    summary.confirmed += 1;
                }
            }
        }
        // leased files named in neither list were cancelled by the agent;
        // they go straight back to pending
        for id in &leased_ids {
            if requested_ok.contains(id) || requested_fail.contains(id) {
                continue;
            }
            if let Some(entry) = inner.files.get_mut(id) {
                if entry.status == FileStatus::Leased
                    && entry.lease_id.as_deref() == Some(lease_id)
                {
                    entry.status = FileStatus::Pending;
                    entry.lease_id = None;
                }
            }
        }

        let lease = inner
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| StoreError::UnknownLease(lease_id.to_string()))?;
        lease.outcome = Some(LeaseOutcome {
            ok: requested_ok,
            fail: requested_fail,
            summary,
        });
        info!(lease = %lease_id, ?summary, "lease confirmed");
        Ok(summary)
    }

    fn expire_leases(&self, now: Instant) -> Result<usize, StoreError> {
        let mut inner = self.inner();
        let past_deadline: Vec<(String, bool)> = inner
            .leases
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, l)| (id.clone(), l.outcome.is_none()))
            .collect();

        let mut released = 0;
        for (lease_id, open) in past_deadline {
            let Some(lease) = inner.leases.remove(&lease_id) else {
                continue;
            };
            // closed leases are kept only until their deadline, to answer
            // idempotent confirm replays; past it they are dropped
            if !open {
                debug!(lease = %lease_id, "closed lease retired");
                continue;
            }
            for id in lease.file_ids {
                if let Some(entry) = inner.files.get_mut(&id) {
                    if entry.status == FileStatus::Leased
                        && entry.lease_id.as_deref() == Some(lease_id.as_str())
                    {
                        entry.status = FileStatus::Pending;
                        entry.lease_id = None;
                        released += 1;
                    }
                }
            }
            warn!(lease = %lease_id, "lease expired, files returned to pending");
        }
        Ok(released)
    }

    fn take_batch(&self, limit: usize, lotes: &[String]) -> Result<Vec<FileEntry>, StoreError> {
        let mut inner = self.inner();
        let selected = select_pending(&inner, limit, lotes);
        let mut files = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(entry) = inner.files.get_mut(&id) {
                entry.status = FileStatus::Downloaded;
                files.push(entry.clone());
            }
        }
        Ok(files)
    }

    fn retry_failed(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner();
        let mut retried = 0;
        for entry in inner.files.values_mut() {
            if entry.status == FileStatus::Failed {
                entry.status = FileStatus::Pending;
                retried += 1;
            }
        }
        Ok(retried)
    }

    fn get_file(&self, id: FileId) -> Result<Option<FileEntry>, StoreError> {
        Ok(self.inner().files.get(&id).cloned())
    }

    fn snapshot(&self) -> Result<Vec<FileEntry>, StoreError> {
        Ok(self.inner().files.values().cloned().collect())
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("In Memory Store").finish()
    }
}
