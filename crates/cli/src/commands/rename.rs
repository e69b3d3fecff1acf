use std::path::Path;

use anyhow::{Context, Result};
use sigprop_core::rename::{apply_with, find_prefix_collisions, load_signature_list, RenameOptions};
use sigprop_core::services::analysis::BinaryView;

use crate::{load_binary, resolve_config, write_json};

/// Apply a signature list to `binary` and optionally write the rename map.
pub fn rename_command(
    binary: &Path,
    signatures: &Path,
    config: Option<&Path>,
    backend: Option<&str>,
    strict: bool,
    output: Option<&Path>,
) -> Result<()> {
    let config = resolve_config(config, backend)?;
    let mut view = load_binary(binary, &config)?;
    println!("Using binary: {}", binary.display());

    let known = load_signature_list(signatures)
        .with_context(|| format!("Failed to load signatures from {}", signatures.display()))?;
    println!("Loaded {} signatures from {}", known.len(), signatures.display());

    for collision in find_prefix_collisions(&known) {
        println!(
            "warning: prefix collision between '{}' (#{}) and '{}' (#{})",
            collision.first_name, collision.first_index, collision.second_name, collision.second_index
        );
    }

    let code_range = config.code_range_or(view.default_code_range());
    let report =
        apply_with(&mut view, &known, code_range, config.rename_window, RenameOptions { strict });

    for event in &report.renames {
        println!("Renamed function at {} from {} to {}", event.address, event.old_name, event.new_name);
    }
    for ambiguous in &report.ambiguous {
        println!(
            "Skipped {} ({}): matches {}",
            ambiguous.address,
            ambiguous.current_name,
            ambiguous.candidates.join(", ")
        );
    }
    println!();
    println!("Renamed {} functions based on signature matches", report.renamed);

    if let Some(path) = output {
        write_json(path, view.renames())?;
        println!("Rename map saved to {}", path.display());
    }
    Ok(())
}
