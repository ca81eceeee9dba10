//! Child-file emission. One file per establishment under
//! `<output_root>/NSA_<nsa>/`, written to a temp name and renamed so a
//! crash never leaves a half-written child visible, and so re-processing a
//! batch is idempotent.

use crate::error::EngineError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// An assembled child before it reaches disk: header, routed records and
/// synthesized trailer(s), in emission order.
#[derive(Debug, Clone)]
pub struct ChildDocument {
    pub pv: String,
    pub name: String,
    pub lines: Vec<Vec<u8>>,
}

/// A persisted child with the identity the transfer protocol needs.
#[derive(Debug, Clone)]
pub struct ChildFile {
    pub pv: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Restricts file names to `[A-Za-z0-9._-]`, collapsing runs of
/// replacements.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out
}

/// Canonical child name: `<PV>_<DDMMAA>_<NSA>_<KIND>.txt`.
pub fn child_name(pv: &str, date: &str, nsa: &str, kind: &str) -> String {
    sanitize_filename(&format!("{pv}_{date}_{nsa}_{kind}.txt"))
}

pub fn lote_dir(output_root: &Path, nsa: &str) -> PathBuf {
    output_root.join(format!("NSA_{nsa}"))
}

pub fn write_children(
    docs: &[ChildDocument],
    output_root: &Path,
    nsa: &str,
) -> Result<Vec<ChildFile>, EngineError> {
    let dir = lote_dir(output_root, nsa);
    fs::create_dir_all(&dir)?;

    let mut written = Vec::with_capacity(docs.len());
    for doc in docs {
        written.push(write_child(doc, &dir)?);
    }
    Ok(written)
}

fn write_child(doc: &ChildDocument, dir: &Path) -> Result<ChildFile, EngineError> {
    let mut content = Vec::new();
    for line in &doc.lines {
        content.extend_from_slice(line);
        content.push(b'\n');
    }

    let final_path = dir.join(&doc.name);
    let tmp_path = dir.join(format!(".{}.tmp", doc.name));
    fs::write(&tmp_path, &content)?;
    fs::rename(&tmp_path, &final_path)?;

    let sha256 = hex::encode(Sha256::digest(&content));
    info!(child = %doc.name, size = content.len(), "child written");

    Ok(ChildFile {
        pv: doc.pv.clone(),
        name: doc.name.clone(),
        path: final_path,
        size: content.len() as u64,
        sha256,
    })
}
