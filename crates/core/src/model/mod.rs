//! Core data model shared by the extractor, scanner, database, and renamer.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of leading instructions that make up a signature.
pub const DEFAULT_SIGNATURE_LEN: usize = 6;

/// Length assumed for an instruction that is last in its basic block.
///
/// This is a heuristic, not a decoded length: on architectures with variable
/// or wider encodings (sBPF `lddw`, x86) the tail of such a signature can be
/// truncated or overrun.
pub const DEFAULT_FALLBACK_INSN_LEN: usize = 4;

/// Bytes read at each function start when replaying signatures.
pub const DEFAULT_RENAME_WINDOW: usize = 48;

/// Variant labels accepted when no configuration overrides them.
pub const DEFAULT_VARIANTS: [&str; 3] = ["Native", "Anchor", "Pinocchio"];

/// Compute the content digest used to key signatures (lowercase SHA-256 hex).
pub fn signature_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical byte signature of one function in the baseline binary.
///
/// Signatures are ephemeral: they are rebuilt every session from the live
/// baseline and only their derived `MatchRecord`s are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub start_addr: u64,
    pub name: String,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub hex: String,
    pub hash: String,
}

impl FunctionSignature {
    /// Build a signature from its raw bytes; `hex` and `hash` are derived.
    pub fn new(start_addr: u64, name: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        let hex = hex::encode(&raw_bytes);
        let hash = signature_digest(&raw_bytes);
        Self { start_addr, name: name.into(), raw_bytes, hex, hash }
    }

    /// Two signatures are the same logical signature when their bytes agree,
    /// regardless of address or name.
    pub fn same_pattern(&self, other: &FunctionSignature) -> bool {
        self.hash == other.hash
    }
}

/// Format an address the way records store it (`0x…`, lowercase).
pub fn format_address(address: u64) -> String {
    format!("{address:#x}")
}

/// Half-open address range `[start, end)` of program code worth fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    #[serde(deserialize_with = "crate::config::de_address")]
    pub start: u64,
    #[serde(deserialize_with = "crate::config::de_address")]
    pub end: u64,
}

impl CodeRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Program region of an sBPF binary as mapped by the loader, excluding the
    /// ELF header area at the very start of the text mapping.
    pub fn sbpf_default() -> Self {
        Self { start: 0x1_0000_0120, end: 0x2_0000_0000 }
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariantError {
    #[error("Invalid variant '{label}'. Must be one of: {allowed}")]
    Unknown { label: String, allowed: String },
    #[error("Variant list must not be empty")]
    Empty,
    #[error("Variant '{0}' is listed more than once")]
    Duplicate(String),
}

/// Ordered, case-sensitive allow-list of build-flavor labels.
///
/// The first entry doubles as the default baseline label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct VariantSet {
    labels: Vec<String>,
}

impl VariantSet {
    pub fn new<I, S>(labels: I) -> Result<Self, VariantError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(VariantError::Empty);
        }
        for (idx, label) in labels.iter().enumerate() {
            if labels[..idx].contains(label) {
                return Err(VariantError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn default_label(&self) -> &str {
        &self.labels[0]
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Accept `label` only if it is in the set, exactly as written.
    pub fn validate<'a>(&self, label: &'a str) -> Result<&'a str, VariantError> {
        if self.contains(label) {
            Ok(label)
        } else {
            Err(VariantError::Unknown { label: label.to_string(), allowed: self.describe() })
        }
    }

    /// Resolve operator input for the baseline label; blank input selects the default.
    pub fn resolve_baseline(&self, input: &str) -> Result<String, VariantError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(self.default_label().to_string());
        }
        self.validate(trimmed).map(str::to_string)
    }

    /// Comma-separated listing for prompts and error messages.
    pub fn describe(&self) -> String {
        self.labels.join(", ")
    }
}

impl Default for VariantSet {
    fn default() -> Self {
        Self { labels: DEFAULT_VARIANTS.iter().map(|s| s.to_string()).collect() }
    }
}

impl TryFrom<Vec<String>> for VariantSet {
    type Error = VariantError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        VariantSet::new(value)
    }
}

impl From<VariantSet> for Vec<String> {
    fn from(value: VariantSet) -> Self {
        value.labels
    }
}

/// Persisted cross-binary observation of one signature, keyed by `hash`.
///
/// `found_in` only ever grows; `name` and `hex` are fixed at first record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub name: String,
    pub found_in: BTreeSet<String>,
    pub hex: String,
    pub hash: String,
    pub address: String,
}

impl MatchRecord {
    /// First observation of `sig` in the given variants.
    pub fn from_signature<'a>(
        sig: &FunctionSignature,
        variants: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            name: sig.name.clone(),
            found_in: variants.into_iter().map(str::to_string).collect(),
            hex: sig.hex.clone(),
            hash: sig.hash.clone(),
            address: format_address(sig.start_addr),
        }
    }

    /// Union `variants` into the provenance set. Returns true if it grew.
    pub fn observe<'a>(&mut self, variants: impl IntoIterator<Item = &'a str>) -> bool {
        let before = self.found_in.len();
        for variant in variants {
            if !self.found_in.contains(variant) {
                self.found_in.insert(variant.to_string());
            }
        }
        self.found_in.len() > before
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.hex)
    }
}
