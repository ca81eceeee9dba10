use crate::error::StoreError;
use crate::{ConfirmSummary, FileEntry, FileId, LeaseGrant, NewFile};
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Contract every file-state engine must honor. All operations are
/// linearizable per file id; a file id never sits in two open leases.
pub trait StoreEngine: Debug + Send + Sync {
    fn register_file(&self, file: NewFile) -> Result<FileId, StoreError>;

    fn lease_files(
        &self,
        limit: usize,
        lotes: &[String],
        ttl: Duration,
    ) -> Result<LeaseGrant, StoreError>;

    fn confirm(
        &self,
        lease_id: &str,
        ok_ids: &[FileId],
        fail_ids: &[FileId],
    ) -> Result<ConfirmSummary, StoreError>;

    fn expire_leases(&self, now: Instant) -> Result<usize, StoreError>;

    fn take_batch(&self, limit: usize, lotes: &[String]) -> Result<Vec<FileEntry>, StoreError>;

    fn retry_failed(&self) -> Result<usize, StoreError>;

    fn get_file(&self, id: FileId) -> Result<Option<FileEntry>, StoreError>;

    fn snapshot(&self) -> Result<Vec<FileEntry>, StoreError>;
}
