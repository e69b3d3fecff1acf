//! Loader for Solana sBPF programs (ELF, `EM_BPF`/`EM_SBF`).
//!
//! Sections are mapped at `PROGRAM_BASE + sh_addr`, which matches the layout
//! used by common sBPF disassembler plugins, so addresses recorded in match
//! databases line up with what an analyst sees there.

use std::collections::{BTreeMap, BTreeSet};

use goblin::elf::{self, Elf};
use tracing::{debug, warn};

use crate::model::CodeRange;
use crate::services::analysis::{
    AnalysisError, DisasmBlock, DisasmFunction, DisasmInstruction, LoadRequest, LoadedBinary,
    LoaderBackend, MappedRegion,
};

/// Virtual address the program image is mapped at.
pub const PROGRAM_BASE: u64 = 0x1_0000_0000;

const EM_SBF: u16 = 263;
const INSN_SIZE: u64 = 8;

const OP_LDDW: u8 = 0x18;
const OP_JA: u8 = 0x05;
const OP_CALL: u8 = 0x85;
const OP_CALLX: u8 = 0x8d;
const OP_EXIT: u8 = 0x95;

pub struct SbpfBackend;

impl SbpfBackend {
    /// Parse an sBPF ELF image that is already in memory.
    pub fn load_bytes(bytes: &[u8]) -> Result<LoadedBinary, AnalysisError> {
        let elf = Elf::parse(bytes).map_err(|e| AnalysisError::Parse(e.to_string()))?;
        if elf.header.e_machine != elf::header::EM_BPF && elf.header.e_machine != EM_SBF {
            return Err(AnalysisError::Unsupported(format!(
                "e_machine {} is not an sBPF program",
                elf.header.e_machine
            )));
        }

        let regions = mapped_regions(&elf, bytes);
        let text: Vec<&MappedRegion> = executable_sections(&elf)
            .into_iter()
            .filter_map(|name| regions.iter().find(|r| r.name == name))
            .collect();
        if text.is_empty() {
            return Err(AnalysisError::Parse("no executable section found".into()));
        }

        let mut entries = symbol_entries(&elf, &text);
        let entry = PROGRAM_BASE.saturating_add(elf.header.e_entry);
        if text.iter().any(|r| r.contains(entry)) {
            entries.entry(entry).or_insert_with(|| "entrypoint".to_string());
        }
        for region in &text {
            for target in internal_call_targets(region) {
                entries.entry(target).or_insert_with(|| format!("sub_{target:x}"));
            }
        }

        let starts: Vec<u64> = entries.keys().copied().collect();
        let mut functions = Vec::with_capacity(entries.len());
        for (idx, (&start, name)) in entries.iter().enumerate() {
            let Some(region) = text.iter().find(|r| r.contains(start)) else { continue };
            let end = starts
                .get(idx + 1)
                .copied()
                .filter(|next| *next <= region.end())
                .unwrap_or_else(|| region.end());
            let insns = decode_range(region, start, end);
            functions.push(DisasmFunction::new(start, name.clone(), split_blocks(&insns, start, end)));
        }

        debug!(functions = functions.len(), regions = regions.len(), "parsed sBPF program");
        Ok(LoadedBinary::new("sbpf", regions, functions, CodeRange::sbpf_default()))
    }
}

impl LoaderBackend for SbpfBackend {
    fn load(&self, request: &LoadRequest) -> Result<LoadedBinary, AnalysisError> {
        let bytes = request.read_bytes()?;
        Self::load_bytes(&bytes)
    }

    fn name(&self) -> &'static str {
        "sbpf"
    }
}

fn section_name<'a>(elf: &'a Elf, sh: &elf::section_header::SectionHeader) -> &'a str {
    elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("")
}

fn mapped_regions(elf: &Elf, bytes: &[u8]) -> Vec<MappedRegion> {
    let mut regions = Vec::new();
    for sh in &elf.section_headers {
        if !sh.is_alloc() || sh.sh_type == elf::section_header::SHT_NOBITS || sh.sh_size == 0 {
            continue;
        }
        let start = sh.sh_offset as usize;
        let Some(end) = start.checked_add(sh.sh_size as usize) else { continue };
        if end > bytes.len() {
            warn!(section = section_name(elf, sh), "section extends past end of file; skipped");
            continue;
        }
        regions.push(MappedRegion::new(
            section_name(elf, sh),
            PROGRAM_BASE.saturating_add(sh.sh_addr),
            bytes[start..end].to_vec(),
        ));
    }
    regions
}

fn executable_sections(elf: &Elf) -> Vec<String> {
    elf.section_headers
        .iter()
        .filter(|sh| sh.is_alloc() && sh.is_executable() && sh.sh_size > 0)
        .map(|sh| section_name(elf, sh).to_string())
        .collect()
}

fn symbol_entries(elf: &Elf, text: &[&MappedRegion]) -> BTreeMap<u64, String> {
    let mut entries = BTreeMap::new();
    let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
    for (syms, strtab) in tables {
        for sym in syms.iter() {
            if !sym.is_function() {
                continue;
            }
            let address = PROGRAM_BASE.saturating_add(sym.st_value);
            if !text.iter().any(|r| r.contains(address)) {
                continue;
            }
            let name = strtab.get_at(sym.st_name).unwrap_or("");
            if name.is_empty() {
                continue;
            }
            entries.entry(address).or_insert_with(|| name.to_string());
        }
    }
    entries
}

/// One decoded instruction slot (16 bytes for `lddw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbpfInsn {
    pub address: u64,
    pub opcode: u8,
    pub dst: u8,
    pub src: u8,
    pub off: i16,
    pub imm: i64,
    pub len: u64,
}

impl SbpfInsn {
    fn class(&self) -> u8 {
        self.opcode & 0x07
    }

    fn is_jump_class(&self) -> bool {
        self.class() == 0x05
    }

    /// Control transfer that ends a basic block.
    fn ends_block(&self) -> bool {
        self.is_jump_class() && self.opcode != OP_CALL && self.opcode != OP_CALLX
    }

    /// Branch destination for `ja` and conditional jumps.
    fn branch_target(&self) -> Option<u64> {
        if !self.ends_block() || self.opcode == OP_EXIT {
            return None;
        }
        let next = self.address.checked_add(INSN_SIZE)?;
        let delta = i64::from(self.off).checked_mul(INSN_SIZE as i64)?;
        next.checked_add_signed(delta)
    }

    pub fn is_conditional(&self) -> bool {
        self.branch_target().is_some() && self.opcode != OP_JA
    }
}

/// Decode the instruction at `offset` within `data`; `None` past the end.
pub fn decode_at(data: &[u8], offset: usize, address: u64) -> Option<SbpfInsn> {
    let raw = data.get(offset..offset + INSN_SIZE as usize)?;
    let opcode = raw[0];
    let dst = raw[1] & 0x0f;
    let src = raw[1] >> 4;
    let off = i16::from_le_bytes([raw[2], raw[3]]);
    let lo = i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if opcode == OP_LDDW {
        let hi_raw = data.get(offset + 8..offset + 16)?;
        let hi = u32::from_le_bytes([hi_raw[4], hi_raw[5], hi_raw[6], hi_raw[7]]);
        let imm = ((u64::from(hi) << 32) | u64::from(lo as u32)) as i64;
        return Some(SbpfInsn { address, opcode, dst, src, off, imm, len: 16 });
    }
    Some(SbpfInsn { address, opcode, dst, src, off, imm: i64::from(lo), len: INSN_SIZE })
}

fn decode_range(region: &MappedRegion, start: u64, end: u64) -> Vec<SbpfInsn> {
    let mut out = Vec::new();
    let mut address = start;
    while address < end {
        let offset = (address - region.address) as usize;
        let Some(insn) = decode_at(&region.data, offset, address) else { break };
        address = address.saturating_add(insn.len);
        out.push(insn);
    }
    out
}

fn internal_call_targets(region: &MappedRegion) -> BTreeSet<u64> {
    let mut targets = BTreeSet::new();
    for insn in decode_range(region, region.address, region.end()) {
        if insn.opcode == OP_CALL && insn.src == 1 {
            let next = insn.address.saturating_add(INSN_SIZE);
            if let Some(target) = next.checked_add_signed(insn.imm.saturating_mul(INSN_SIZE as i64)) {
                if region.contains(target) {
                    targets.insert(target);
                }
            }
        }
    }
    targets
}

/// Group decoded instructions into basic blocks in address order.
fn split_blocks(insns: &[SbpfInsn], start: u64, end: u64) -> Vec<DisasmBlock> {
    let mut leaders = BTreeSet::new();
    leaders.insert(start);
    for insn in insns {
        if insn.ends_block() {
            leaders.insert(insn.address.saturating_add(insn.len));
        }
        if let Some(target) = insn.branch_target() {
            if target >= start && target < end {
                leaders.insert(target);
            }
        }
    }

    let mut blocks: Vec<DisasmBlock> = Vec::new();
    let mut current: Vec<DisasmInstruction> = Vec::new();
    for insn in insns {
        if leaders.contains(&insn.address) && !current.is_empty() {
            blocks.push(DisasmBlock::new(std::mem::take(&mut current)));
        }
        current.push(DisasmInstruction::new(insn.address, render_tokens(insn)));
    }
    if !current.is_empty() {
        blocks.push(DisasmBlock::new(current));
    }
    blocks
}

fn size_suffix(opcode: u8) -> &'static str {
    match opcode & 0x18 {
        0x00 => "w",
        0x08 => "h",
        0x10 => "b",
        _ => "dw",
    }
}

fn alu_mnemonic(op: u8) -> &'static str {
    match op {
        0x00 => "add",
        0x10 => "sub",
        0x20 => "mul",
        0x30 => "div",
        0x40 => "or",
        0x50 => "and",
        0x60 => "lsh",
        0x70 => "rsh",
        0x80 => "neg",
        0x90 => "mod",
        0xa0 => "xor",
        0xb0 => "mov",
        0xc0 => "arsh",
        0xd0 => "end",
        _ => "alu?",
    }
}

fn jmp_mnemonic(op: u8) -> &'static str {
    match op {
        0x00 => "ja",
        0x10 => "jeq",
        0x20 => "jgt",
        0x30 => "jge",
        0x40 => "jset",
        0x50 => "jne",
        0x60 => "jsgt",
        0x70 => "jsge",
        0xa0 => "jlt",
        0xb0 => "jle",
        0xc0 => "jslt",
        0xd0 => "jsle",
        _ => "jmp?",
    }
}

fn reg(n: u8) -> String {
    format!("r{n}")
}

fn mem(base: u8, off: i16) -> String {
    if off < 0 {
        format!("[r{base}-{:#x}]", -i32::from(off))
    } else {
        format!("[r{base}+{off:#x}]")
    }
}

fn tokens(mnemonic: impl Into<String>, operands: Vec<String>) -> Vec<String> {
    let mut out = vec![mnemonic.into()];
    for (idx, operand) in operands.into_iter().enumerate() {
        out.push(if idx == 0 { " ".to_string() } else { ", ".to_string() });
        out.push(operand);
    }
    out
}

/// Render display tokens for an instruction (mnemonic, separators, operands).
pub fn render_tokens(insn: &SbpfInsn) -> Vec<String> {
    let uses_reg = insn.opcode & 0x08 != 0;
    match insn.class() {
        0x00 if insn.opcode == OP_LDDW => {
            tokens("lddw", vec![reg(insn.dst), format!("{:#x}", insn.imm as u64)])
        }
        0x01 => tokens(
            format!("ldx{}", size_suffix(insn.opcode)),
            vec![reg(insn.dst), mem(insn.src, insn.off)],
        ),
        0x02 => tokens(
            format!("st{}", size_suffix(insn.opcode)),
            vec![mem(insn.dst, insn.off), format!("{:#x}", insn.imm)],
        ),
        0x03 => tokens(
            format!("stx{}", size_suffix(insn.opcode)),
            vec![mem(insn.dst, insn.off), reg(insn.src)],
        ),
        class @ (0x04 | 0x07) => {
            let width = if class == 0x07 { "64" } else { "32" };
            let op = insn.opcode & 0xf0;
            let mnemonic = format!("{}{width}", alu_mnemonic(op));
            if op == 0x80 {
                tokens(mnemonic, vec![reg(insn.dst)])
            } else if uses_reg {
                tokens(mnemonic, vec![reg(insn.dst), reg(insn.src)])
            } else {
                tokens(mnemonic, vec![reg(insn.dst), format!("{:#x}", insn.imm)])
            }
        }
        0x05 => match insn.opcode {
            OP_EXIT => tokens("exit", vec![]),
            OP_CALL => tokens("call", vec![format!("{:#x}", insn.imm)]),
            OP_CALLX => tokens("callx", vec![reg(insn.imm as u8)]),
            OP_JA => tokens("ja", vec![format!("{:+}", insn.off)]),
            _ => {
                let rhs = if uses_reg { reg(insn.src) } else { format!("{:#x}", insn.imm) };
                tokens(
                    jmp_mnemonic(insn.opcode & 0xf0),
                    vec![reg(insn.dst), rhs, format!("{:+}", insn.off)],
                )
            }
        },
        _ => tokens(".insn", vec![format!("{:#04x}", insn.opcode)]),
    }
}
