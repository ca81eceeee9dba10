//! Record-oriented reading of mother files.
//!
//! Lines are kept as raw bytes end to end so children reproduce the source
//! byte for byte; text is only decoded (lossily) for logging. Classification
//! uses the leading three-byte type code for the fixed-width kinds and the
//! first comma field for EEVD.

use crate::error::EngineError;
use rede_splitter_common::layout::FieldSpec;
use rede_splitter_common::FileKind;
use std::borrow::Cow;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Record {
    /// 1-based line number in the mother file.
    pub number: usize,
    /// Record type code: three leading bytes, or the first CSV field.
    pub rtype: String,
    /// The line exactly as read, without the terminator.
    pub raw: Vec<u8>,
}

impl Record {
    pub fn classify(kind: FileKind, number: usize, raw: Vec<u8>) -> Self {
        let rtype = match kind {
            FileKind::Eevd => {
                let first = raw.split(|b| *b == b',').next().unwrap_or(&[]);
                String::from_utf8_lossy(first).trim().to_string()
            }
            _ => {
                let head = raw.get(0..3).unwrap_or(&raw);
                String::from_utf8_lossy(head).to_string()
            }
        };
        Record { number, rtype, raw }
    }

    /// Positional slice for a registry field; fails when the line is too
    /// short for the declared range.
    pub fn bytes(&self, spec: &FieldSpec) -> Result<&[u8], EngineError> {
        self.raw
            .get(spec.start..spec.end)
            .ok_or(EngineError::TruncatedLine {
                line: self.number,
                record_type: self.rtype.clone(),
                field: spec.name,
                start: spec.start,
                end: spec.end,
            })
    }

    pub fn text(&self, spec: &FieldSpec) -> Result<String, EngineError> {
        Ok(String::from_utf8_lossy(self.bytes(spec)?).trim().to_string())
    }

    pub fn money(&self, spec: &FieldSpec) -> Result<i64, EngineError> {
        Ok(rede_splitter_common::money::to_cents(self.bytes(spec)?))
    }

    pub fn lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// Splits a raw EEVD line into trimmed comma fields.
pub fn csv_fields(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == b',')
        .map(|part| String::from_utf8_lossy(part).trim().to_string())
        .collect()
}

/// Rewrites one comma field in place, keeping every other byte of the line
/// untouched.
pub fn rewrite_csv_field(raw: &[u8], index: usize, value: &str) -> Vec<u8> {
    let mut parts: Vec<&[u8]> = raw.split(|b| *b == b',').collect();
    let value = value.as_bytes();
    if index < parts.len() {
        parts[index] = value;
    }
    parts.join(&b","[..])
}

/// Overwrites a fixed byte range of a line (used for the header PV rewrite).
pub fn rewrite_fixed_range(
    raw: &[u8],
    start: usize,
    end: usize,
    value: &str,
    line: usize,
    rtype: &str,
) -> Result<Vec<u8>, EngineError> {
    if raw.len() < end {
        return Err(EngineError::TruncatedLine {
            line,
            record_type: rtype.to_string(),
            field: "pv_grupo",
            start,
            end,
        });
    }
    let mut out = raw.to_vec();
    out[start..end].copy_from_slice(&value.as_bytes()[..end - start]);
    Ok(out)
}

/// Loads a mother file into classified records, skipping blank lines and
/// tolerating CRLF terminators. The first record must be the kind's header.
pub fn read_records(path: &Path, kind: FileKind) -> Result<Vec<Record>, EngineError> {
    let bytes = fs::read(path)?;
    records_from_bytes(&bytes, kind)
}

pub fn records_from_bytes(bytes: &[u8], kind: FileKind) -> Result<Vec<Record>, EngineError> {
    let mut records = Vec::new();
    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        records.push(Record::classify(kind, idx + 1, line.to_vec()));
    }
    match records.first() {
        Some(first) if first.rtype == kind.header_type() => Ok(records),
        _ => Err(EngineError::MalformedHeader {
            kind,
            expected: kind.header_type(),
        }),
    }
}

/// Date hint from a mother-file name: the last run of six or more digits,
/// truncated to its final six.
pub fn date_hint_from_name(name: &str) -> Option<String> {
    digit_runs(name)
        .into_iter()
        .filter(|run| run.len() >= 6)
        .next_back()
        .map(|run| run[run.len() - 6..].to_string())
}

/// NSA hint from a mother-file name: the last three-digit run, or the tail
/// of the last longer run.
pub fn nsa_hint_from_name(name: &str) -> Option<String> {
    let runs = digit_runs(name);
    if let Some(run) = runs.iter().rev().find(|run| run.len() == 3) {
        return Some(run.clone());
    }
    runs.last()
        .filter(|run| run.len() >= 3)
        .map(|run| run[run.len() - 3..].to_string())
}

fn digit_runs(name: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}
