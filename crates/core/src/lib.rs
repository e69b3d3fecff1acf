//! sigprop-core
//!
//! Core library for identifying functions in compiled programs by short
//! instruction-byte prefixes ("signatures") and propagating their names across
//! related builds of the same source.
//!
//! The crate holds every piece of substantive logic so it stays testable and
//! reusable from multiple frontends:
//! - `model`: signatures, variant labels, code ranges.
//! - `services`: the disassembly boundary and loader backends (sBPF, Capstone).
//! - `signature`: prefix extraction and raw-image scanning.
//! - `db`: the JSON match database and the SQLite scan ledger.
//! - `session`: the operator-driven matching session.
//! - `rename`: replaying a signature list onto another binary.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod rename;
pub mod services;
pub mod session;
pub mod signature;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
