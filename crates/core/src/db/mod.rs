//! Match database and scan history.
//!
//! The match database is the terminal artifact of a session: one
//! [`MatchRecord`] per signature hash, each carrying the set of variants the
//! signature was observed in. It is an explicit value; every mutation goes
//! through [`MatchDatabase::merge_found`] or [`MatchDatabase::dedup`] so it can
//! be persisted after any step.
//!
//! The scan ledger (`ledger`) is a separate SQLite history of which binaries
//! were scanned, when, and with what result.

pub mod ledger;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{signature_digest, FunctionSignature, MatchRecord};
use crate::signature::Exclusions;

pub use ledger::{LedgerError, ScanLedger, ScanRecord};

/// Error type for match database persistence.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse match database {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record whose `hex` cannot be decoded; its hash cannot be verified.
    #[error("Record '{name}' has invalid hex: {source}")]
    InvalidHex {
        name: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Failed to serialize match database: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience result type for match database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Counts reported at the end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub records: usize,
    pub per_variant: BTreeMap<String, usize>,
}

/// What a single merge step changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
}

/// In-memory match database.
///
/// Records keep insertion order until [`dedup`](Self::dedup) sorts them. A
/// database loaded from an edited file may briefly hold several records for
/// one hash; the index points at the first and `dedup` collapses the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchDatabase {
    records: Vec<MatchRecord>,
    index: HashMap<String, usize>,
}

impl MatchDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<MatchRecord>) -> Self {
        let mut index = HashMap::new();
        for (pos, record) in records.iter().enumerate() {
            index.entry(record.hash.clone()).or_insert(pos);
        }
        Self { records, index }
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MatchRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, hash: &str) -> Option<&MatchRecord> {
        self.index.get(hash).map(|&pos| &self.records[pos])
    }

    /// Apply one scan result: every hash in `found` is recorded as observed in
    /// both `baseline_variant` and `target_variant`.
    ///
    /// New records are built from the first candidate carrying the hash, so
    /// the outcome does not depend on the order binaries are merged in. An
    /// existing record keeps its name even if the candidate's name differs.
    pub fn merge_found(
        &mut self,
        found: &HashSet<String>,
        candidates: &[FunctionSignature],
        baseline_variant: &str,
        target_variant: &str,
    ) -> MergeStats {
        let mut by_hash: HashMap<&str, &FunctionSignature> = HashMap::new();
        for sig in candidates {
            by_hash.entry(sig.hash.as_str()).or_insert(sig);
        }

        let mut hashes: Vec<&String> = found.iter().collect();
        hashes.sort();

        let mut stats = MergeStats::default();
        let variants = [baseline_variant, target_variant];
        for hash in hashes {
            if let Some(&pos) = self.index.get(hash.as_str()) {
                let record = &mut self.records[pos];
                if let Some(sig) = by_hash.get(hash.as_str()) {
                    if sig.name != record.name {
                        debug!(
                            hash = %hash,
                            kept = %record.name,
                            other = %sig.name,
                            "same signature under a different name; keeping first"
                        );
                    }
                }
                if record.observe(variants) {
                    stats.updated += 1;
                }
                continue;
            }

            let Some(sig) = by_hash.get(hash.as_str()) else {
                warn!(hash = %hash, "hit for unknown signature; ignoring");
                continue;
            };
            self.index.insert(hash.clone(), self.records.len());
            self.records.push(MatchRecord::from_signature(sig, variants));
            stats.created += 1;
        }

        debug!(
            baseline = baseline_variant,
            target = target_variant,
            created = stats.created,
            updated = stats.updated,
            "merged scan result"
        );
        stats
    }

    /// Collapse records sharing a hash by unioning `found_in`, then sort by
    /// name (hash breaks ties) for stable output. Idempotent.
    pub fn dedup(self) -> Self {
        let mut merged: Vec<MatchRecord> = Vec::with_capacity(self.records.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for record in self.records {
            match seen.get(&record.hash) {
                Some(&pos) => {
                    let kept = &mut merged[pos];
                    kept.found_in.extend(record.found_in);
                }
                None => {
                    seen.insert(record.hash.clone(), merged.len());
                    merged.push(record);
                }
            }
        }
        merged.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.hash.cmp(&b.hash)));
        Self::from_records(merged)
    }

    /// The `(hash, variant)` pairs already observed, excluding the baseline
    /// variant itself (a signature is trivially present in its own baseline).
    pub fn exclusions_for(&self, baseline_variant: &str) -> Exclusions {
        self.records
            .iter()
            .flat_map(|record| {
                record
                    .found_in
                    .iter()
                    .filter(|v| v.as_str() != baseline_variant)
                    .map(|v| (record.hash.clone(), v.clone()))
            })
            .collect()
    }

    pub fn stats(&self) -> DbStats {
        let mut per_variant = BTreeMap::new();
        for record in &self.records {
            for variant in &record.found_in {
                *per_variant.entry(variant.clone()).or_insert(0) += 1;
            }
        }
        DbStats { records: self.records.len(), per_variant }
    }
}

/// Value-passing form of [`MatchDatabase::merge_found`].
pub fn merge(
    mut db: MatchDatabase,
    found: &HashSet<String>,
    candidates: &[FunctionSignature],
    baseline_variant: &str,
    target_variant: &str,
) -> MatchDatabase {
    db.merge_found(found, candidates, baseline_variant, target_variant);
    db
}

/// Value-passing form of [`MatchDatabase::dedup`].
pub fn dedup(db: MatchDatabase) -> MatchDatabase {
    db.dedup()
}

/// Load a persisted match database.
///
/// Each record's hash is recomputed from its hex; a stale hash (for example
/// from a file written with a different digest) is replaced.
pub fn load_database(path: &Path) -> DbResult<MatchDatabase> {
    let text = fs::read_to_string(path)
        .map_err(|source| DbError::Io { path: path.to_path_buf(), source })?;
    let mut records: Vec<MatchRecord> = serde_json::from_str(&text)
        .map_err(|source| DbError::Parse { path: path.to_path_buf(), source })?;

    let mut rekeyed = 0usize;
    for record in &mut records {
        let bytes = record
            .decode_bytes()
            .map_err(|source| DbError::InvalidHex { name: record.name.clone(), source })?;
        let hash = signature_digest(&bytes);
        if hash != record.hash {
            rekeyed += 1;
            record.hash = hash;
        }
    }
    if rekeyed > 0 {
        warn!(path = %path.display(), rekeyed, "recomputed stale record hashes");
    }

    info!(path = %path.display(), records = records.len(), "loaded match database");
    Ok(MatchDatabase::from_records(records))
}

/// Write `db` as a pretty-printed JSON array.
pub fn save_database(db: &MatchDatabase, path: &Path) -> DbResult<()> {
    let json = serde_json::to_string_pretty(db.records())?;
    fs::write(path, json).map_err(|source| DbError::Io { path: path.to_path_buf(), source })?;
    info!(path = %path.display(), records = db.len(), "saved match database");
    Ok(())
}
