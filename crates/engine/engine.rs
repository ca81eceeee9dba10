//! Split-and-reconcile engine for acquirer settlement files.
//!
//! A mother file is read record by record, each detail record is routed to
//! its establishment (PV) bucket, per-PV totals are accumulated in integer
//! cents, per-PV trailers are regenerated in the exact wire format and one
//! child file per establishment is written. The mother trailer totals are
//! then compared against the recomputed sums.
//!
//! Processing one mother file is strictly sequential: record order carries
//! routing state (the current PV for the fixed-width kinds, the RV map for
//! the delimited one). Independent mother files may run on parallel
//! workers; they share nothing but the frozen layout registry and the
//! output root, and each batch writes its own `NSA_<nsa>` tree.

pub mod bucket;
pub mod eevc;
pub mod eevd;
pub mod eefi;
pub mod error;
pub mod integrity;
pub mod reader;
pub mod reconcile;
pub mod writer;

use bucket::Buckets;
use error::EngineError;
use reader::Record;
use reconcile::Verdict;
use rede_splitter_common::FileKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;
use writer::{ChildDocument, ChildFile};

/// Identity of the mother file being processed.
#[derive(Debug, Clone)]
pub struct MotherMeta {
    pub kind: FileKind,
    pub source: String,
    /// Emission date, DDMMAA.
    pub date: String,
    /// Last three digits of the file sequence number.
    pub nsa: String,
    /// Matrix/group establishment declared in the header.
    pub matrix: String,
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub output_root: PathBuf,
    /// Reconciliation tolerance in cents.
    pub tolerance_cents: i64,
    /// Skip buckets that hold only structural records.
    pub skip_empty_buckets: bool,
}

impl SplitOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        SplitOptions {
            output_root: output_root.into(),
            tolerance_cents: 0,
            skip_empty_buckets: true,
        }
    }
}

/// In-memory result of routing + aggregation + trailer synthesis, before
/// anything touches disk.
#[derive(Debug)]
pub(crate) struct KindRun {
    pub meta: MotherMeta,
    pub buckets: Buckets,
    pub docs: Vec<ChildDocument>,
    pub verdict: Verdict,
    pub type_counts: HashMap<String, u64>,
}

pub struct SplitOutcome {
    pub mother: MotherMeta,
    pub children: Vec<ChildFile>,
    pub verdict: Verdict,
    /// Record-type histogram of the mother's detail section.
    pub type_counts: HashMap<String, u64>,
}

/// Splits one mother file into per-establishment children and reconciles
/// the totals. The kind is taken from the caller or detected from the file
/// name once; it is never re-inspected downstream.
pub fn split_file(
    input: &Path,
    kind: Option<FileKind>,
    opts: &SplitOptions,
) -> Result<SplitOutcome, EngineError> {
    let source = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = kind
        .or_else(|| FileKind::from_filename(&source))
        .ok_or_else(|| EngineError::UnknownKind(source.clone()))?;

    info!(file = %source, %kind, "processing mother file");
    let records = reader::read_records(input, kind)?;
    let run = run_records(&records, kind, &source, opts)?;
    let children = writer::write_children(&run.docs, &opts.output_root, &run.meta.nsa)?;

    info!(
        file = %source,
        children = children.len(),
        status = ?run.verdict.status,
        "split finished"
    );
    Ok(SplitOutcome {
        mother: run.meta,
        children,
        verdict: run.verdict,
        type_counts: run.type_counts,
    })
}

pub(crate) fn run_records(
    records: &[Record],
    kind: FileKind,
    source: &str,
    opts: &SplitOptions,
) -> Result<KindRun, EngineError> {
    match kind {
        FileKind::Eevc => eevc::process(records, source, opts),
        FileKind::Eevd => eevd::process(records, source, opts),
        FileKind::Eefi => eefi::process(records, source, opts),
    }
}
