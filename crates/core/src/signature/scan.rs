use std::collections::HashSet;
use std::path::{Path, PathBuf};

use aho_corasick::AhoCorasick;
use tracing::{debug, info, warn};

use crate::model::{signature_digest, FunctionSignature};

/// `(hash, variant)` pairs already confirmed; scanning skips them.
pub type Exclusions = HashSet<(String, String)>;

/// Candidates still worth testing for `variant`, one per distinct hash.
fn pending<'a>(
    candidates: &'a [FunctionSignature],
    variant: &str,
    already_seen: &Exclusions,
) -> Vec<&'a FunctionSignature> {
    let mut seen_hashes = HashSet::new();
    candidates
        .iter()
        .filter(|sig| !sig.raw_bytes.is_empty())
        .filter(|sig| !already_seen.contains(&(sig.hash.clone(), variant.to_string())))
        .filter(|sig| seen_hashes.insert(sig.hash.as_str()))
        .collect()
}

/// Hashes of the candidates whose bytes occur verbatim somewhere in `image`.
///
/// Pure: the caller decides how to apply the result. Containment is an exact
/// byte match at any offset, with no alignment or section awareness.
pub fn scan(
    image: &[u8],
    candidates: &[FunctionSignature],
    variant: &str,
    already_seen: &Exclusions,
) -> HashSet<String> {
    let pending = pending(candidates, variant, already_seen);
    find_present(image, &pending)
}

fn find_present(image: &[u8], pending: &[&FunctionSignature]) -> HashSet<String> {
    let mut found = HashSet::new();
    if pending.is_empty() {
        return found;
    }

    let patterns: Vec<&[u8]> = pending.iter().map(|sig| sig.raw_bytes.as_slice()).collect();
    match AhoCorasick::new(&patterns) {
        Ok(ac) => {
            for m in ac.find_overlapping_iter(image) {
                let sig = pending[m.pattern().as_usize()];
                if found.insert(sig.hash.clone()) {
                    debug!(function = %sig.name, address = sig.start_addr, offset = m.start(), "signature found");
                }
                if found.len() == pending.len() {
                    break;
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "multi-pattern search unavailable; scanning candidates one by one");
            for sig in pending {
                let needle = sig.raw_bytes.as_slice();
                if image.windows(needle.len()).any(|w| w == needle) {
                    found.insert(sig.hash.clone());
                }
            }
        }
    }
    found
}

/// Result of scanning one target binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub path: PathBuf,
    pub variant: String,
    /// Candidates actually tested (after exclusions and hash dedup).
    pub tested: usize,
    pub hits: HashSet<String>,
    /// SHA-256 of the image, when it could be read.
    pub image_sha256: Option<String>,
    /// Read failure, reported to the operator; `hits` is empty in that case.
    pub error: Option<String>,
}

impl ScanOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Read `path` and scan it. An unreadable file yields an empty outcome that
/// carries the error instead of failing the session.
pub fn scan_file(
    path: &Path,
    candidates: &[FunctionSignature],
    variant: &str,
    already_seen: &Exclusions,
) -> ScanOutcome {
    let pending = pending(candidates, variant, already_seen);
    let tested = pending.len();
    match std::fs::read(path) {
        Ok(image) => {
            let hits = find_present(&image, &pending);
            info!(path = %path.display(), variant, tested, hits = hits.len(), "scanned binary");
            ScanOutcome {
                path: path.to_path_buf(),
                variant: variant.to_string(),
                tested,
                hits,
                image_sha256: Some(signature_digest(&image)),
                error: None,
            }
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read target binary");
            ScanOutcome {
                path: path.to_path_buf(),
                variant: variant.to_string(),
                tested,
                hits: HashSet::new(),
                image_sha256: None,
                error: Some(format!("Error processing {variant} file {}: {err}", path.display())),
            }
        }
    }
}
