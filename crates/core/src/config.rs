use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{
    CodeRange, VariantSet, DEFAULT_FALLBACK_INSN_LEN, DEFAULT_RENAME_WINDOW, DEFAULT_SIGNATURE_LEN,
};

/// Serializable configuration for extraction, matching, and renaming.
///
/// Every field is optional on disk; missing fields take the defaults used for
/// Solana program builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Accepted variant labels; the first one is the default baseline label.
    pub variants: VariantSet,
    /// Functions outside this range are never fingerprinted or renamed.
    /// When absent, the loader backend's default range is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_range: Option<CodeRange>,
    /// Number of leading instructions per signature.
    pub signature_len: usize,
    /// Length assumed for the last instruction of a basic block.
    pub fallback_insn_len: usize,
    /// Bytes read at each function start by the renamer.
    pub rename_window: usize,
    /// Loader backend used to open binaries (`sbpf`, `capstone`).
    pub backend: String,
    /// Optional architecture hint for backends that support several (e.g. x86_64).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            variants: VariantSet::default(),
            code_range: None,
            signature_len: DEFAULT_SIGNATURE_LEN,
            fallback_insn_len: DEFAULT_FALLBACK_INSN_LEN,
            rename_window: DEFAULT_RENAME_WINDOW,
            backend: "sbpf".to_string(),
            arch: None,
        }
    }
}

impl MatchConfig {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.signature_len == 0 {
            bail!("signature_len must be at least 1");
        }
        if self.fallback_insn_len == 0 {
            bail!("fallback_insn_len must be at least 1");
        }
        if self.rename_window == 0 {
            bail!("rename_window must be at least 1");
        }
        if let Some(range) = &self.code_range {
            if range.is_empty() {
                bail!("code_range start must be below end (got {range})");
            }
        }
        if self.backend.trim().is_empty() {
            bail!("backend must not be empty");
        }
        Ok(())
    }

    /// Resolve the effective code range against a backend default.
    pub fn code_range_or(&self, fallback: CodeRange) -> CodeRange {
        self.code_range.unwrap_or(fallback)
    }
}

/// Load a config from YAML (`.yaml`/`.yml`) or JSON (`.json`) and validate it.
pub fn load_match_config(path: &Path) -> Result<MatchConfig> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
    let config: MatchConfig = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse YAML config {}", path.display()))?,
        "json" => serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse JSON config {}", path.display()))?,
        other => {
            return Err(anyhow!(
                "Unsupported config extension '{other}' for {} (expected yaml, yml, or json)",
                path.display()
            ))
        }
    };
    config.validate().with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Load the config at `path` if given, otherwise return defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<MatchConfig> {
    match path {
        Some(p) => load_match_config(p),
        None => Ok(MatchConfig::default()),
    }
}

/// Parse an address written as a number or as a `0x`-prefixed / decimal string.
pub fn parse_address(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let hex = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"));
    match hex {
        Some(digits) => u64::from_str_radix(&digits.replace('_', ""), 16).ok(),
        None => trimmed.replace('_', "").parse().ok(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Number(u64),
    Text(String),
}

pub(crate) fn de_address<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match AddressRepr::deserialize(deserializer)? {
        AddressRepr::Number(n) => Ok(n),
        AddressRepr::Text(s) => parse_address(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid address '{s}'"))),
    }
}
