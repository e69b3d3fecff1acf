//! Disassembly boundary and loader backends.

pub mod analysis;
pub mod backends;
