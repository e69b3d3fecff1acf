use std::collections::BTreeSet;

use capstone::{arch, prelude::*, Capstone, InsnGroupId};
use goblin::{elf, mach, pe, Object};
use tracing::{debug, warn};

use crate::model::CodeRange;
use crate::services::analysis::{
    AnalysisError, DisasmBlock, DisasmFunction, DisasmInstruction, LoadRequest, LoadedBinary,
    LoaderBackend, MappedRegion,
};

/// Upper bound on instructions decoded per function.
const MAX_FUNCTION_INSNS: usize = 4096;

pub struct CapstoneBackend;

#[derive(Debug, Clone)]
struct SymbolInfo {
    name: String,
    address: u64,
    size: Option<u64>,
}

#[derive(Debug, Clone)]
struct SectionRange {
    name: String,
    start: u64,
    end: u64,
    file_offset: usize,
    size: usize,
    executable: bool,
}

fn capstone_version() -> String {
    let (major, minor) = Capstone::lib_version();
    format!("{major}.{minor}")
}

fn capstone_arch_from_object(obj: &Object) -> Option<String> {
    match obj {
        Object::Elf(elf) => match elf.header.e_machine {
            elf::header::EM_X86_64 => Some("x86_64".into()),
            elf::header::EM_386 => Some("x86".into()),
            elf::header::EM_AARCH64 => Some("arm64".into()),
            elf::header::EM_ARM => Some("arm".into()),
            _ => None,
        },
        Object::PE(pe) => match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Some("x86".into()),
            pe::header::COFF_MACHINE_X86_64 => Some("x86_64".into()),
            pe::header::COFF_MACHINE_ARM => Some("arm".into()),
            pe::header::COFF_MACHINE_ARM64 => Some("arm64".into()),
            _ => None,
        },
        Object::Mach(mach::Mach::Binary(bin)) => match bin.header.cputype() {
            mach::cputype::CPU_TYPE_X86 => Some("x86".into()),
            mach::cputype::CPU_TYPE_X86_64 => Some("x86_64".into()),
            mach::cputype::CPU_TYPE_ARM => Some("arm".into()),
            mach::cputype::CPU_TYPE_ARM64 => Some("arm64".into()),
            _ => None,
        },
        _ => None,
    }
}

fn make_cs(arch: &str) -> Result<Capstone, AnalysisError> {
    let built = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        "x86" | "i386" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build()
        }
        "arm" | "armv7" => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build()
        }
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
        other => return Err(AnalysisError::Unsupported(format!("capstone arch '{other}'"))),
    };
    built.map_err(|e| AnalysisError::Backend(format!("capstone init failed: {e}")))
}

fn elf_symbols(elf: &elf::Elf) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    for sym in &elf.syms {
        if sym.is_function()
            && sym.st_value > 0
            && sym.st_shndx != elf::section_header::SHN_UNDEF as usize
        {
            let name = elf.strtab.get_at(sym.st_name).unwrap_or("").to_string();
            if name.is_empty() {
                continue;
            }
            let size = if sym.st_size > 0 { Some(sym.st_size) } else { None };
            symbols.push(SymbolInfo { name, address: sym.st_value, size });
        }
    }
    symbols
}

fn mach_symbols(bin: &mach::MachO) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    for sym in bin.symbols() {
        let Ok((name, nlist)) = sym else { continue };
        if nlist.n_value == 0 {
            continue;
        }
        let name = name.trim_start_matches('_').to_string();
        if name.is_empty() {
            continue;
        }
        symbols.push(SymbolInfo { name, address: nlist.n_value, size: None });
    }
    symbols
}

fn pe_symbols(pe: &pe::PE) -> Vec<SymbolInfo> {
    pe.exports
        .iter()
        .filter(|exp| exp.rva != 0)
        .filter_map(|exp| {
            let name = exp.name.unwrap_or_default();
            (!name.is_empty()).then(|| SymbolInfo {
                name: name.to_string(),
                address: exp.rva as u64,
                size: None,
            })
        })
        .collect()
}

fn collect_sections(obj: &Object, bytes_len: usize) -> Vec<SectionRange> {
    let sections: Vec<SectionRange> = match obj {
        Object::Elf(elf) => elf
            .section_headers
            .iter()
            .filter(|sh| sh.is_alloc() && sh.sh_type != elf::section_header::SHT_NOBITS)
            .map(|sh| SectionRange {
                name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
                start: sh.sh_addr,
                end: sh.sh_addr.saturating_add(sh.sh_size),
                file_offset: sh.sh_offset as usize,
                size: sh.sh_size as usize,
                executable: sh.is_executable(),
            })
            .collect(),
        Object::PE(pe) => pe
            .sections
            .iter()
            .map(|sec| SectionRange {
                name: sec.name().unwrap_or_default().to_string(),
                start: sec.virtual_address as u64,
                end: sec.virtual_address as u64 + sec.virtual_size.max(sec.size_of_raw_data) as u64,
                file_offset: sec.pointer_to_raw_data as usize,
                size: sec.size_of_raw_data as usize,
                executable: sec.characteristics & pe::section_table::IMAGE_SCN_MEM_EXECUTE != 0,
            })
            .collect(),
        Object::Mach(mach::Mach::Binary(bin)) => bin
            .segments
            .sections()
            .flatten()
            .filter_map(|res| res.ok())
            .map(|(sec, _)| SectionRange {
                name: sec.name().unwrap_or("").to_string(),
                start: sec.addr,
                end: sec.addr.saturating_add(sec.size),
                file_offset: sec.offset as usize,
                size: sec.size as usize,
                executable: sec.name().map(|n| n == "__text").unwrap_or(false),
            })
            .collect(),
        _ => Vec::new(),
    };
    sections
        .into_iter()
        .filter(|s| s.size > 0 && s.file_offset.saturating_add(s.size) <= bytes_len)
        .collect()
}

fn decode_jump_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

fn has_group(detail: &capstone::InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

/// Disassemble one function body and split it at jumps, returns, and jump targets.
fn disassemble_function(
    cs: &Capstone,
    code: &[u8],
    start: u64,
) -> Result<Vec<DisasmBlock>, AnalysisError> {
    let insns = cs
        .disasm_count(code, start, MAX_FUNCTION_INSNS)
        .map_err(|e| AnalysisError::Backend(format!("disassembly failed at {start:#x}: {e}")))?;
    let end = start.saturating_add(code.len() as u64);

    let mut leaders = BTreeSet::new();
    leaders.insert(start);
    let mut decoded = Vec::new();
    for insn in insns.iter() {
        let next = insn.address().saturating_add(insn.bytes().len() as u64);
        if let Ok(detail) = cs.insn_detail(insn) {
            let is_jump = has_group(&detail, capstone::InsnGroupType::CS_GRP_JUMP as u8);
            let is_ret = has_group(&detail, capstone::InsnGroupType::CS_GRP_RET as u8);
            if is_jump || is_ret {
                leaders.insert(next);
            }
            if is_jump {
                if let Some(target) = decode_jump_target(&detail) {
                    if target >= start && target < end {
                        leaders.insert(target);
                    }
                }
            }
        }
        let mut tokens = vec![insn.mnemonic().unwrap_or("").to_string()];
        if let Some(ops) = insn.op_str().filter(|s| !s.is_empty()) {
            tokens.push(" ".to_string());
            tokens.push(ops.to_string());
        }
        decoded.push(DisasmInstruction::new(insn.address(), tokens));
    }

    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for insn in decoded {
        if leaders.contains(&insn.address) && !current.is_empty() {
            blocks.push(DisasmBlock::new(std::mem::take(&mut current)));
        }
        current.push(insn);
    }
    if !current.is_empty() {
        blocks.push(DisasmBlock::new(current));
    }
    Ok(blocks)
}

impl CapstoneBackend {
    /// Parse an ELF/PE/Mach-O image already in memory.
    pub fn load_bytes(bytes: &[u8], arch_hint: Option<&str>) -> Result<LoadedBinary, AnalysisError> {
        let obj = Object::parse(bytes).map_err(|e| AnalysisError::Parse(e.to_string()))?;
        let arch = arch_hint
            .map(|h| h.to_lowercase())
            .or_else(|| capstone_arch_from_object(&obj))
            .ok_or_else(|| AnalysisError::Unsupported("unknown architecture".into()))?;
        let cs = make_cs(&arch)?;

        let sections = collect_sections(&obj, bytes.len());
        let mut symbols = match &obj {
            Object::Elf(elf) => elf_symbols(elf),
            Object::PE(pe) => pe_symbols(pe),
            Object::Mach(mach::Mach::Binary(bin)) => mach_symbols(bin),
            _ => Vec::new(),
        };
        symbols.sort_by_key(|s| s.address);
        symbols.dedup_by_key(|s| s.address);

        let regions: Vec<MappedRegion> = sections
            .iter()
            .map(|s| {
                MappedRegion::new(
                    s.name.clone(),
                    s.start,
                    bytes[s.file_offset..s.file_offset + s.size].to_vec(),
                )
            })
            .collect();

        let mut functions = Vec::new();
        for (idx, sym) in symbols.iter().enumerate() {
            let Some(sec) =
                sections.iter().find(|s| s.executable && sym.address >= s.start && sym.address < s.end)
            else {
                continue;
            };
            let mut end = sec.start.saturating_add(sec.size as u64);
            if let Some(size) = sym.size {
                end = end.min(sym.address.saturating_add(size));
            }
            if let Some(next) = symbols.get(idx + 1) {
                if next.address > sym.address {
                    end = end.min(next.address);
                }
            }
            let offset = sec.file_offset + (sym.address - sec.start) as usize;
            let len = end.saturating_sub(sym.address) as usize;
            let Some(code) = bytes.get(offset..offset + len) else { continue };
            let blocks = match disassemble_function(&cs, code, sym.address) {
                Ok(blocks) => blocks,
                Err(err) => {
                    warn!(function = %sym.name, error = %err, "skipping function");
                    continue;
                }
            };
            functions.push(DisasmFunction::new(sym.address, sym.name.clone(), blocks));
        }

        let code_range = sections
            .iter()
            .filter(|s| s.executable)
            .fold(None, |acc: Option<CodeRange>, s| {
                Some(match acc {
                    Some(r) => CodeRange::new(r.start.min(s.start), r.end.max(s.end)),
                    None => CodeRange::new(s.start, s.end),
                })
            })
            .unwrap_or(CodeRange::new(0, u64::MAX));

        debug!(
            arch = %arch,
            capstone = %capstone_version(),
            functions = functions.len(),
            "disassembled native binary"
        );
        Ok(LoadedBinary::new("capstone", regions, functions, code_range))
    }
}

impl LoaderBackend for CapstoneBackend {
    fn load(&self, request: &LoadRequest) -> Result<LoadedBinary, AnalysisError> {
        let bytes = request.read_bytes()?;
        Self::load_bytes(&bytes, request.arch.as_deref())
    }

    fn name(&self) -> &'static str {
        "capstone"
    }
}
