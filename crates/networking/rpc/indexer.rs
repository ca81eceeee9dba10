//! Registers the children sitting under the output root into the file-state
//! table. Runs at startup and on every `/scan`, so children produced by a
//! split that happened while the service was down still get picked up.

use rede_splitter_storage::{NewFile, Store};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Walks `<output_root>/NSA_*/*.txt` and registers every child, computing
/// its size and SHA-256. Returns how many entries were visited.
pub fn index_output(store: &Store, output_root: &Path) -> std::io::Result<usize> {
    let mut indexed = 0;
    if !output_root.exists() {
        return Ok(0);
    }
    for lote_entry in fs::read_dir(output_root)? {
        let lote_entry = lote_entry?;
        let lote = lote_entry.file_name().to_string_lossy().to_string();
        if !lote.starts_with("NSA_") || !lote_entry.path().is_dir() {
            continue;
        }
        for child in fs::read_dir(lote_entry.path())? {
            let child = child?;
            let name = child.file_name().to_string_lossy().to_string();
            if !name.ends_with(".txt") || name.starts_with('.') {
                continue;
            }
            let path = child.path();
            let content = match fs::read(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(file = %path.display(), %err, "unreadable child skipped");
                    continue;
                }
            };
            let pv = name.split('_').next().unwrap_or_default().to_string();
            let registered = store.register_file(NewFile {
                pv,
                name: name.clone(),
                lote: lote.clone(),
                path,
                size: content.len() as u64,
                sha256: hex::encode(Sha256::digest(&content)),
            });
            match registered {
                Ok(_) => indexed += 1,
                Err(err) => warn!(file = %name, %err, "registration failed"),
            }
        }
    }
    debug!(indexed, root = %output_root.display(), "output tree indexed");
    Ok(indexed)
}
