//! Replay a saved signature list onto a different binary.
//!
//! A function is renamed when the bytes at its entry start with a known
//! signature. Signature lists are order-sensitive: by default the first entry
//! that matches (and would change the name) wins. Strict mode refuses to pick
//! between entries with different names and reports the function instead.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{format_address, CodeRange};
use crate::services::analysis::{BinaryView, RenameEvent};

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Failed to read signature list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse signature list {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk entry; other fields (`hash`, `start_addr`, `found_in`) are ignored.
#[derive(Debug, Deserialize)]
struct SignatureEntry {
    name: String,
    #[serde(default)]
    hex: String,
}

/// A named byte prefix ready for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownSignature {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl KnownSignature {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes }
    }
}

/// Parse a signature list, keeping file order. Entries with empty or invalid
/// hex are skipped.
pub fn parse_signature_list(text: &str) -> Result<Vec<KnownSignature>, serde_json::Error> {
    let entries: Vec<SignatureEntry> = serde_json::from_str(text)?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match hex::decode(entry.hex.trim()) {
            Ok(bytes) if !bytes.is_empty() => out.push(KnownSignature::new(entry.name, bytes)),
            Ok(_) => warn!(name = %entry.name, "signature has no bytes; skipping"),
            Err(err) => warn!(name = %entry.name, error = %err, "invalid signature hex; skipping"),
        }
    }
    Ok(out)
}

/// Load a signature list (either the extractor's output or a match database).
pub fn load_signature_list(path: &Path) -> Result<Vec<KnownSignature>, RenameError> {
    let text = fs::read_to_string(path)
        .map_err(|source| RenameError::Io { path: path.to_path_buf(), source })?;
    let sigs = parse_signature_list(&text)
        .map_err(|source| RenameError::Parse { path: path.to_path_buf(), source })?;
    info!(path = %path.display(), signatures = sigs.len(), "loaded signature list");
    Ok(sigs)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOptions {
    /// Skip functions whose window matches entries with different names.
    pub strict: bool,
}

/// A function left alone because several differently named entries matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub address: String,
    pub current_name: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameReport {
    pub renamed: usize,
    pub renames: Vec<RenameEvent>,
    pub ambiguous: Vec<AmbiguousMatch>,
}

/// Two entries with different names where one's bytes are a prefix of the
/// other's; which one applies depends on list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixCollision {
    pub first_index: usize,
    pub first_name: String,
    pub second_index: usize,
    pub second_name: String,
}

pub fn find_prefix_collisions(signatures: &[KnownSignature]) -> Vec<PrefixCollision> {
    let mut out = Vec::new();
    for (i, a) in signatures.iter().enumerate() {
        for (j, b) in signatures.iter().enumerate().skip(i + 1) {
            if a.name == b.name {
                continue;
            }
            if a.bytes.starts_with(&b.bytes) || b.bytes.starts_with(&a.bytes) {
                out.push(PrefixCollision {
                    first_index: i,
                    first_name: a.name.clone(),
                    second_index: j,
                    second_name: b.name.clone(),
                });
            }
        }
    }
    out
}

/// Rename every in-range function whose entry bytes start with a known
/// signature; returns the number of renames. First match wins.
pub fn apply(
    view: &mut dyn BinaryView,
    signatures: &[KnownSignature],
    code_range: CodeRange,
    window: usize,
) -> usize {
    apply_with(view, signatures, code_range, window, RenameOptions::default()).renamed
}

/// [`apply`] with options, returning the full report.
pub fn apply_with(
    view: &mut dyn BinaryView,
    signatures: &[KnownSignature],
    code_range: CodeRange,
    window: usize,
    options: RenameOptions,
) -> RenameReport {
    let targets: Vec<(u64, String)> = view
        .functions()
        .iter()
        .filter(|f| code_range.contains(f.start))
        .map(|f| (f.start, f.name.clone()))
        .collect();

    let mut report = RenameReport::default();
    for (start, current) in targets {
        let Some(bytes) = view.read(start, window).filter(|b| !b.is_empty()) else {
            debug!(address = start, "no bytes at function start; skipping");
            continue;
        };

        let new_name = if options.strict {
            let mut names: Vec<&str> = signatures
                .iter()
                .filter(|sig| bytes.starts_with(&sig.bytes))
                .map(|sig| sig.name.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();
            match names.as_slice() {
                [] => None,
                [only] if *only != current => Some(only.to_string()),
                [_] => None,
                _ => {
                    warn!(address = start, function = %current, candidates = ?names, "ambiguous signature match; leaving unchanged");
                    report.ambiguous.push(AmbiguousMatch {
                        address: format_address(start),
                        current_name: current.clone(),
                        candidates: names.iter().map(|n| n.to_string()).collect(),
                    });
                    None
                }
            }
        } else {
            signatures
                .iter()
                .find(|sig| sig.name != current && bytes.starts_with(&sig.bytes))
                .map(|sig| sig.name.clone())
        };

        let Some(new_name) = new_name else {
            continue;
        };
        match view.rename(start, &new_name) {
            Ok(()) => {
                info!(address = %format_address(start), old = %current, new = %new_name, "renamed function");
                report.renamed += 1;
                report.renames.push(RenameEvent {
                    address: format_address(start),
                    old_name: current,
                    new_name,
                });
            }
            Err(err) => warn!(address = start, error = %err, "rename failed; skipping"),
        }
    }
    report
}
