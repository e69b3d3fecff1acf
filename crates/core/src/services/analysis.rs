use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::CodeRange;

/// One disassembled instruction: its address and display tokens.
///
/// Tokens are diagnostic only; matching always works on raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasmInstruction {
    pub address: u64,
    pub tokens: Vec<String>,
}

impl DisasmInstruction {
    pub fn new(address: u64, tokens: Vec<String>) -> Self {
        Self { address, tokens }
    }

    /// Metadata-only pseudo-instructions carry no tokens.
    pub fn has_tokens(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

/// Basic block in program order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisasmBlock {
    pub instructions: Vec<DisasmInstruction>,
}

impl DisasmBlock {
    pub fn new(instructions: Vec<DisasmInstruction>) -> Self {
        Self { instructions }
    }
}

/// Function as seen by the disassembler: entry, current name, blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasmFunction {
    pub start: u64,
    pub name: String,
    pub blocks: Vec<DisasmBlock>,
}

impl DisasmFunction {
    pub fn new(start: u64, name: impl Into<String>, blocks: Vec<DisasmBlock>) -> Self {
        Self { start, name: name.into(), blocks }
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

/// A rename applied to a loaded binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEvent {
    pub address: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("Failed to read binary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse binary: {0}")]
    Parse(String),
    #[error("Unsupported binary: {0}")]
    Unsupported(String),
    #[error("Backend not found: {0}")]
    MissingBackend(String),
    #[error("No function starts at {0:#x}")]
    UnknownFunction(u64),
    #[error("Analysis backend error: {0}")]
    Backend(String),
}

/// What the matching engine needs from a disassembler.
///
/// Implemented by [`LoadedBinary`]; tests and other hosts can provide their own.
pub trait BinaryView {
    /// Path the view was loaded from, when it came from disk.
    fn path(&self) -> Option<&Path>;

    /// Functions in the order the disassembler enumerates them.
    fn functions(&self) -> &[DisasmFunction];

    /// Read up to `len` bytes at `address`. Returns fewer bytes near the end of
    /// a mapped region and `None` when `address` is not mapped.
    fn read(&self, address: u64, len: usize) -> Option<Vec<u8>>;

    /// Rename the function starting at `start`.
    fn rename(&mut self, start: u64, name: &str) -> Result<(), AnalysisError>;

    /// Range of addresses that hold program code for this kind of binary.
    fn default_code_range(&self) -> CodeRange;

    fn function_name(&self, start: u64) -> Option<&str> {
        self.functions().iter().find(|f| f.start == start).map(|f| f.name.as_str())
    }
}

/// Contiguous bytes mapped at a virtual address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRegion {
    pub name: String,
    pub address: u64,
    pub data: Vec<u8>,
}

impl MappedRegion {
    pub fn new(name: impl Into<String>, address: u64, data: Vec<u8>) -> Self {
        Self { name: name.into(), address, data }
    }

    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.data.len() as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }
}

/// In-memory binary produced by a loader backend.
///
/// Renames are applied to the function table and logged so a frontend can
/// export them; the file on disk is never modified.
#[derive(Debug, Clone)]
pub struct LoadedBinary {
    path: Option<PathBuf>,
    backend: String,
    regions: Vec<MappedRegion>,
    functions: Vec<DisasmFunction>,
    code_range: CodeRange,
    renames: Vec<RenameEvent>,
}

impl LoadedBinary {
    pub fn new(
        backend: impl Into<String>,
        regions: Vec<MappedRegion>,
        functions: Vec<DisasmFunction>,
        code_range: CodeRange,
    ) -> Self {
        Self {
            path: None,
            backend: backend.into(),
            regions,
            functions,
            code_range,
            renames: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn regions(&self) -> &[MappedRegion] {
        &self.regions
    }

    /// Renames applied since load, in application order.
    pub fn renames(&self) -> &[RenameEvent] {
        &self.renames
    }
}

impl BinaryView for LoadedBinary {
    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn functions(&self) -> &[DisasmFunction] {
        &self.functions
    }

    fn read(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let region = self.regions.iter().find(|r| r.contains(address))?;
        let start = (address - region.address) as usize;
        let end = start.saturating_add(len).min(region.data.len());
        Some(region.data[start..end].to_vec())
    }

    fn rename(&mut self, start: u64, name: &str) -> Result<(), AnalysisError> {
        let func = self
            .functions
            .iter_mut()
            .find(|f| f.start == start)
            .ok_or(AnalysisError::UnknownFunction(start))?;
        let old_name = std::mem::replace(&mut func.name, name.to_string());
        debug!(address = %format!("{start:#x}"), %old_name, new_name = name, "renamed function");
        self.renames.push(RenameEvent {
            address: crate::model::format_address(start),
            old_name,
            new_name: name.to_string(),
        });
        Ok(())
    }

    fn default_code_range(&self) -> CodeRange {
        self.code_range
    }
}

/// Request to load a binary through a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub path: PathBuf,
    /// Optional architecture hint (e.g., x86_64, arm64) for multi-arch backends.
    pub arch: Option<String>,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), arch: None }
    }

    pub fn with_arch(mut self, arch: Option<String>) -> Self {
        self.arch = arch;
        self
    }

    /// Read the file named by the request.
    pub fn read_bytes(&self) -> Result<Vec<u8>, AnalysisError> {
        if !self.path.is_file() {
            return Err(AnalysisError::MissingBinary(self.path.clone()));
        }
        std::fs::read(&self.path)
            .map_err(|source| AnalysisError::Io { path: self.path.clone(), source })
    }
}

/// Trait implemented by loader backends (sBPF, Capstone).
pub trait LoaderBackend: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<LoadedBinary, AnalysisError>;
    fn name(&self) -> &'static str;
}

/// Registry for loader backends; callers select by name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn LoaderBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register<B: LoaderBackend + 'static>(&mut self, backend: B) -> &mut Self {
        self.backends.insert(backend.name().to_string(), Box::new(backend));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn LoaderBackend> {
        self.backends.get(name).map(|b| &**b)
    }

    /// Return a sorted list of registered backend names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.backends.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Load `request` with the backend called `name`.
    pub fn load(&self, name: &str, request: &LoadRequest) -> Result<LoadedBinary, AnalysisError> {
        let backend = self.get(name).ok_or_else(|| {
            AnalysisError::MissingBackend(format!(
                "{name} (available: {})",
                self.names().join(", ")
            ))
        })?;
        let loaded = backend.load(request)?;
        debug!(
            backend = name,
            path = %request.path.display(),
            functions = loaded.functions().len(),
            "loaded binary"
        );
        Ok(loaded.with_path(request.path.clone()))
    }
}

/// Registry populated with every backend compiled into this build.
pub fn default_backend_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(crate::services::backends::SbpfBackend);
    #[cfg(feature = "capstone-backend")]
    {
        registry.register(crate::services::backends::CapstoneBackend);
    }
    registry
}
