use rede_splitter_common::FileKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed header: {kind} file must start with a {expected} record")]
    MalformedHeader {
        kind: FileKind,
        expected: &'static str,
    },
    #[error("Line {line}: {record_type} record too short for {field} at [{start},{end})")]
    TruncatedLine {
        line: usize,
        record_type: String,
        field: &'static str,
        start: usize,
        end: usize,
    },
    #[error("Mother trailer record not found")]
    MissingMotherTrailer,
    #[error("Could not detect the file kind of {0}")]
    UnknownKind(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Header and trailer level failures make the input unusable; record
    /// level failures are logged and skipped by the callers instead.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedHeader { .. }
                | EngineError::TruncatedLine { .. }
                | EngineError::MissingMotherTrailer
                | EngineError::UnknownKind(_)
        )
    }
}
