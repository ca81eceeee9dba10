//! Independent integrity pass: re-reads the mother and the children it
//! produced, indexes record-type counts per establishment on both sides and
//! reports the difference. Deliberately separate from reconciliation; this
//! checks that no routed record was lost or duplicated, not that the money
//! adds up.

use crate::error::EngineError;
use crate::{reader, run_records, SplitOptions};
use rede_splitter_common::FileKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntegrityStatus {
    Ok,
    Missing,
    Extra,
}

impl fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityStatus::Ok => f.write_str("OK"),
            IntegrityStatus::Missing => f.write_str("Missing"),
            IntegrityStatus::Extra => f.write_str("Extra"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityRow {
    pub pv: String,
    pub record_type: String,
    pub mother_qty: u64,
    pub child_qty: u64,
    pub status: IntegrityStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub rows: Vec<IntegrityRow>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.rows.iter().all(|r| r.status == IntegrityStatus::Ok)
    }

    /// Semicolon-separated report, one row per (PV, record type).
    pub fn to_csv(&self) -> String {
        let mut out = String::from("pv;tipo;qtd_mae;qtd_filhos;status\n");
        for r in &self.rows {
            out.push_str(&format!(
                "{};{};{};{};{}\n",
                r.pv, r.record_type, r.mother_qty, r.child_qty, r.status
            ));
        }
        out
    }
}

/// Compares the (PV, record type) histogram of a mother file against the
/// children found in a batch directory.
pub fn validate_children(
    mother: &Path,
    kind: Option<FileKind>,
    lote_dir: &Path,
) -> Result<IntegrityReport, EngineError> {
    let source = mother
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = kind
        .or_else(|| FileKind::from_filename(&source))
        .ok_or_else(|| EngineError::UnknownKind(source.clone()))?;

    let opts = SplitOptions::new(lote_dir);
    let records = reader::read_records(mother, kind)?;
    let mother_run = run_records(&records, kind, &source, &opts)?;

    let mut mother_counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    for b in mother_run.buckets.iter() {
        for (rtype, qty) in &b.type_counts {
            mother_counts.insert((b.pv.clone(), rtype.clone()), *qty);
        }
    }

    let suffix = format!("_{}.txt", kind.as_str());
    let mut child_counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    for entry in std::fs::read_dir(lote_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(&suffix) || name.starts_with("SEM_MOV") {
            continue;
        }
        let child_records = reader::read_records(&entry.path(), kind)?;
        let child_run = run_records(&child_records, kind, &name, &opts)?;
        for b in child_run.buckets.iter() {
            for (rtype, qty) in &b.type_counts {
                *child_counts
                    .entry((b.pv.clone(), rtype.clone()))
                    .or_default() += *qty;
            }
        }
    }

    let keys: Vec<_> = mother_counts
        .keys()
        .chain(child_counts.keys())
        .cloned()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let rows = keys
        .into_iter()
        .map(|key| {
            let mother_qty = mother_counts.get(&key).copied().unwrap_or(0);
            let child_qty = child_counts.get(&key).copied().unwrap_or(0);
            let status = match child_qty.cmp(&mother_qty) {
                std::cmp::Ordering::Equal => IntegrityStatus::Ok,
                std::cmp::Ordering::Less => IntegrityStatus::Missing,
                std::cmp::Ordering::Greater => IntegrityStatus::Extra,
            };
            IntegrityRow {
                pv: key.0,
                record_type: key.1,
                mother_qty,
                child_qty,
                status,
            }
        })
        .collect::<Vec<_>>();

    let report = IntegrityReport { rows };
    info!(
        rows = report.rows.len(),
        ok = report.is_ok(),
        "integrity validation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{split_file, writer};
    use std::fs;

    fn eevd_mother() -> Vec<u8> {
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "01,020770677,08102025,07102025,12345,2,20000,60,19940,D".into(),
            "01,020770678,08102025,07102025,12346,3,10000,40,9960,P".into(),
            "05,020770677,12345,extra".into(),
            "04,020770677,000002,000005,30000,100,29900,10000,40,9960,000006".into(),
        ];
        format!("{}\n", lines.join("\n")).into_bytes()
    }

    #[test]
    fn intact_children_report_all_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mother_path = dir.path().join("MATRIZ_EEVD.txt");
        fs::write(&mother_path, eevd_mother()).unwrap();

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother_path, None, &opts).unwrap();
        assert_eq!(outcome.children.len(), 2);

        let lote = writer::lote_dir(&opts.output_root, &outcome.mother.nsa);
        let report = validate_children(&mother_path, None, &lote).unwrap();
        assert!(report.is_ok());
        assert!(report
            .rows
            .iter()
            .any(|r| r.pv == "020770677" && r.record_type == "05" && r.mother_qty == 1));

        let csv = report.to_csv();
        assert!(csv.starts_with("pv;tipo;qtd_mae;qtd_filhos;status\n"));
        assert!(csv.contains("020770678;01;1;1;OK"));
    }

    #[test]
    fn a_tampered_child_is_flagged_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mother_path = dir.path().join("MATRIZ_EEVD.txt");
        fs::write(&mother_path, eevd_mother()).unwrap();

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother_path, None, &opts).unwrap();
        let lote = writer::lote_dir(&opts.output_root, &outcome.mother.nsa);

        // drop the 05 record from the first child
        let victim = outcome
            .children
            .iter()
            .find(|c| c.pv == "020770677")
            .unwrap();
        let content = fs::read_to_string(&victim.path).unwrap();
        let kept: Vec<&str> = content.lines().filter(|l| !l.starts_with("05,")).collect();
        fs::write(&victim.path, format!("{}\n", kept.join("\n"))).unwrap();

        let report = validate_children(&mother_path, None, &lote).unwrap();
        assert!(!report.is_ok());
        let row = report
            .rows
            .iter()
            .find(|r| r.pv == "020770677" && r.record_type == "05")
            .unwrap();
        assert_eq!(row.status, IntegrityStatus::Missing);
        assert_eq!((row.mother_qty, row.child_qty), (1, 0));
    }
}
