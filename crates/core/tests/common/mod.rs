#![allow(dead_code)]

use sigprop_core::model::CodeRange;
use sigprop_core::services::analysis::{
    DisasmBlock, DisasmFunction, DisasmInstruction, LoadedBinary, MappedRegion,
};

pub const TEXT_ADDR: u64 = 0x120;
pub const PROGRAM_TEXT: u64 = 0x1_0000_0120;

/// One 8-byte sBPF instruction slot.
pub fn insn(opcode: u8, dst: u8, src: u8, off: i16, imm: i32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0] = opcode;
    out[1] = (src << 4) | (dst & 0x0f);
    out[2..4].copy_from_slice(&off.to_le_bytes());
    out[4..8].copy_from_slice(&imm.to_le_bytes());
    out
}

pub fn mov(dst: u8, imm: i32) -> [u8; 8] {
    insn(0xb7, dst, 0, 0, imm)
}

pub fn exit() -> [u8; 8] {
    insn(0x95, 0, 0, 0, 0)
}

pub fn code(insns: &[[u8; 8]]) -> Vec<u8> {
    insns.iter().flatten().copied().collect()
}

/// Seven-instruction function body whose first six instructions are unique to `seed`.
pub fn long_body(seed: i32) -> Vec<u8> {
    code(&[
        mov(1, seed),
        mov(2, seed + 1),
        mov(3, seed + 2),
        mov(4, seed + 3),
        mov(5, seed + 4),
        mov(0, seed + 5),
        exit(),
    ])
}

/// Synthetic view: a single region with linear functions, one block each.
///
/// `functions` lists `(start, name, instruction lengths)`; every instruction
/// gets a `nop` token.
pub fn linear_view(base: u64, data: Vec<u8>, functions: &[(u64, &str, Vec<u64>)]) -> LoadedBinary {
    let funcs = functions
        .iter()
        .map(|(start, name, lens)| {
            let mut address = *start;
            let mut insns = Vec::new();
            for len in lens.iter() {
                insns.push(DisasmInstruction::new(address, vec!["nop".into()]));
                address += len;
            }
            DisasmFunction::new(*start, *name, vec![DisasmBlock::new(insns)])
        })
        .collect();
    let end = base + data.len() as u64;
    LoadedBinary::new("test", vec![MappedRegion::new(".text", base, data)], funcs, CodeRange::new(base, end))
}

struct Section {
    name_off: u32,
    kind: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    while buf.len() % align != 0 {
        buf.push(0);
    }
}

/// Minimal sBPF ELF: `.text` at file offset and address `0x120` plus a symbol
/// table naming `functions` (offsets into `text`).
pub fn sbpf_elf(text: &[u8], functions: &[(&str, u64)]) -> Vec<u8> {
    sbpf_elf_with_machine(text, functions, 247)
}

pub fn sbpf_elf_with_machine(text: &[u8], functions: &[(&str, u64)], machine: u16) -> Vec<u8> {
    let mut buf = vec![0u8; TEXT_ADDR as usize];
    buf.extend_from_slice(text);
    let text_size = text.len() as u64;

    // .strtab
    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in functions {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }

    // .symtab
    let mut symtab = vec![0u8; 24];
    for ((_, offset), name_off) in functions.iter().zip(&name_offsets) {
        symtab.extend_from_slice(&name_off.to_le_bytes());
        symtab.push(0x12); // STB_GLOBAL | STT_FUNC
        symtab.push(0);
        symtab.extend_from_slice(&1u16.to_le_bytes());
        symtab.extend_from_slice(&(TEXT_ADDR + offset).to_le_bytes());
        symtab.extend_from_slice(&0u64.to_le_bytes());
    }

    let shstrtab = b"\0.text\0.symtab\0.strtab\0.shstrtab\0".to_vec();

    pad_to(&mut buf, 8);
    let symtab_off = buf.len() as u64;
    buf.extend_from_slice(&symtab);
    let strtab_off = buf.len() as u64;
    buf.extend_from_slice(&strtab);
    let shstrtab_off = buf.len() as u64;
    buf.extend_from_slice(&shstrtab);
    pad_to(&mut buf, 8);
    let shoff = buf.len() as u64;

    let sections = [
        Section { name_off: 0, kind: 0, flags: 0, addr: 0, offset: 0, size: 0, link: 0, info: 0, align: 0, entsize: 0 },
        Section { name_off: 1, kind: 1, flags: 0x6, addr: TEXT_ADDR, offset: TEXT_ADDR, size: text_size, link: 0, info: 0, align: 8, entsize: 0 },
        Section { name_off: 7, kind: 2, flags: 0, addr: 0, offset: symtab_off, size: symtab.len() as u64, link: 3, info: 1, align: 8, entsize: 24 },
        Section { name_off: 15, kind: 3, flags: 0, addr: 0, offset: strtab_off, size: strtab.len() as u64, link: 0, info: 0, align: 1, entsize: 0 },
        Section { name_off: 23, kind: 3, flags: 0, addr: 0, offset: shstrtab_off, size: shstrtab.len() as u64, link: 0, info: 0, align: 1, entsize: 0 },
    ];
    for s in &sections {
        buf.extend_from_slice(&s.name_off.to_le_bytes());
        buf.extend_from_slice(&s.kind.to_le_bytes());
        buf.extend_from_slice(&s.flags.to_le_bytes());
        buf.extend_from_slice(&s.addr.to_le_bytes());
        buf.extend_from_slice(&s.offset.to_le_bytes());
        buf.extend_from_slice(&s.size.to_le_bytes());
        buf.extend_from_slice(&s.link.to_le_bytes());
        buf.extend_from_slice(&s.info.to_le_bytes());
        buf.extend_from_slice(&s.align.to_le_bytes());
        buf.extend_from_slice(&s.entsize.to_le_bytes());
    }

    // ELF header.
    let mut header = Vec::with_capacity(64);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
    header.extend_from_slice(&machine.to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&TEXT_ADDR.to_le_bytes()); // e_entry
    header.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    header.extend_from_slice(&shoff.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    header.extend_from_slice(&64u16.to_le_bytes());
    header.extend_from_slice(&56u16.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&64u16.to_le_bytes());
    header.extend_from_slice(&(sections.len() as u16).to_le_bytes());
    header.extend_from_slice(&4u16.to_le_bytes());
    buf[..64].copy_from_slice(&header);
    buf
}
