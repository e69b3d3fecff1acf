use std::path::Path;

use anyhow::Result;
use sigprop_core::model::format_address;
use sigprop_core::signature::{extract_all, ExtractOptions};

use crate::{load_binary, resolve_config, write_json};

/// Extract baseline signatures and write them as a signature list, or print
/// a summary when no output path is given.
pub fn extract_command(
    baseline: &Path,
    config: Option<&Path>,
    backend: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let config = resolve_config(config, backend)?;
    let view = load_binary(baseline, &config)?;
    let options = ExtractOptions::from_config(&config, &view);
    let signatures = extract_all(&view, &options);

    println!(
        "Generated signatures for {} functions in {} (range {})",
        signatures.len(),
        baseline.display(),
        options.code_range
    );

    match output {
        Some(path) => {
            write_json(path, &signatures)?;
            println!("Signatures saved to {}", path.display());
        }
        None => {
            for sig in &signatures {
                println!("  {} {} {}", format_address(sig.start_addr), sig.name, sig.hash);
            }
        }
    }
    Ok(())
}
