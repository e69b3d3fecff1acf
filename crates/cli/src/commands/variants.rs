use std::path::Path;

use anyhow::Result;
use sigprop_core::config::load_or_default;

/// Print the configured variant labels; the first is the default baseline.
pub fn list_variants_command(config: Option<&Path>) -> Result<()> {
    let config = load_or_default(config)?;
    let variants = &config.variants;
    println!("Variants:");
    for label in variants.labels() {
        if label == variants.default_label() {
            println!("- {label} (default)");
        } else {
            println!("- {label}");
        }
    }
    Ok(())
}
