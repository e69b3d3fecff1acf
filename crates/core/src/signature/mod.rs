//! Signature extraction from a disassembled baseline and exact-prefix scanning
//! of raw binary images.

pub mod extract;
pub mod scan;

pub use extract::{extract, extract_all, ExtractOptions};
pub use scan::{scan, scan_file, Exclusions, ScanOutcome};
