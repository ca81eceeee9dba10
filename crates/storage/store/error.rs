use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown or expired lease: {0}")]
    UnknownLease(String),
    #[error("Lease {0} was already confirmed with a different outcome")]
    ConflictingConfirm(String),
    #[error("{0}")]
    Custom(String),
}
