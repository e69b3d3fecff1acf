pub mod commands;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sigprop_core::config::{load_or_default, MatchConfig};
use sigprop_core::services::analysis::{default_backend_registry, LoadRequest, LoadedBinary};

/// Load the config at `path` (or defaults) and apply a backend override.
pub fn resolve_config(path: Option<&Path>, backend: Option<&str>) -> Result<MatchConfig> {
    let mut config = load_or_default(path)?;
    if let Some(name) = backend {
        config.backend = name.to_string();
    }
    Ok(config)
}

/// Open `path` with the backend named in `config`.
pub fn load_binary(path: &Path, config: &MatchConfig) -> Result<LoadedBinary> {
    let registry = default_backend_registry();
    let request = LoadRequest::new(path).with_arch(config.arch.clone());
    registry
        .load(&config.backend, &request)
        .with_context(|| format!("Failed to load binary {}", path.display()))
}

/// Write `value` as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
