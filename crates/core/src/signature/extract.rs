use tracing::{debug, trace};

use crate::config::MatchConfig;
use crate::model::{CodeRange, FunctionSignature};
use crate::services::analysis::{BinaryView, DisasmBlock, DisasmFunction};

/// Parameters of the canonicalization procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Instructions per signature.
    pub signature_len: usize,
    /// Length assumed for the last instruction of a block (heuristic).
    pub fallback_insn_len: usize,
    /// Only functions whose entry lies here are fingerprinted.
    pub code_range: CodeRange,
}

impl ExtractOptions {
    /// Options from `config`, falling back to the view's code range when the
    /// config does not name one.
    pub fn from_config(config: &MatchConfig, view: &dyn BinaryView) -> Self {
        Self {
            signature_len: config.signature_len,
            fallback_insn_len: config.fallback_insn_len,
            code_range: config.code_range_or(view.default_code_range()),
        }
    }
}

/// Encoded length of the instruction at `idx`: the distance to the next
/// instruction of the same block, or the fallback when it is the block's last.
fn instruction_len(block: &DisasmBlock, idx: usize, fallback: usize) -> usize {
    let address = block.instructions[idx].address;
    block.instructions[idx + 1..]
        .iter()
        .find(|next| next.address > address)
        .map(|next| (next.address - address) as usize)
        .unwrap_or(fallback)
}

/// Build the canonical signature of `func`: the concatenated bytes of its first
/// `signature_len` instructions that carry display tokens.
///
/// Returns `None` when the function is too short or a byte read fails; such
/// functions are skipped rather than fingerprinted with a short signature.
pub fn extract(
    view: &dyn BinaryView,
    func: &DisasmFunction,
    options: &ExtractOptions,
) -> Option<FunctionSignature> {
    let mut raw = Vec::new();
    let mut taken = 0usize;

    'blocks: for block in &func.blocks {
        for (idx, insn) in block.instructions.iter().enumerate() {
            if taken >= options.signature_len {
                break 'blocks;
            }
            if !insn.has_tokens() {
                continue;
            }
            let len = instruction_len(block, idx, options.fallback_insn_len);
            let bytes = view.read(insn.address, len).filter(|b| b.len() == len);
            let Some(bytes) = bytes else {
                debug!(function = %func.name, address = insn.address, len, "byte read failed; skipping");
                return None;
            };
            trace!(
                function = %func.name,
                index = taken + 1,
                address = insn.address,
                text = %insn.text(),
                bytes = %hex::encode(&bytes),
                "signature instruction"
            );
            raw.extend_from_slice(&bytes);
            taken += 1;
        }
    }

    if taken < options.signature_len {
        debug!(function = %func.name, found = taken, "not enough instructions; skipping");
        return None;
    }

    let sig = FunctionSignature::new(func.start, func.name.clone(), raw);
    debug!(function = %sig.name, hash = %sig.hash, len = sig.raw_bytes.len(), "extracted signature");
    Some(sig)
}

/// Extract signatures for every in-range function of `view`, in enumeration order.
pub fn extract_all(view: &dyn BinaryView, options: &ExtractOptions) -> Vec<FunctionSignature> {
    view.functions()
        .iter()
        .filter(|f| options.code_range.contains(f.start))
        .filter_map(|f| extract(view, f, options))
        .collect()
}
