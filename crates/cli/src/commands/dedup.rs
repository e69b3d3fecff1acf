use std::path::Path;

use anyhow::{Context, Result};
use sigprop_core::db::{load_database, save_database};

/// Deduplicate a saved match database. Without `output` the result is
/// printed to stdout.
pub fn dedup_command(input: &Path, output: Option<&Path>) -> Result<()> {
    let db = load_database(input)
        .with_context(|| format!("Failed to load match database {}", input.display()))?;
    let before = db.len();
    let db = db.dedup();

    match output {
        Some(path) => {
            save_database(&db, path)
                .with_context(|| format!("Failed to save match database {}", path.display()))?;
            println!("Deduplicated {before} matches to {} unique entries", db.len());
            println!("Results saved to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(db.records())?),
    }
    Ok(())
}
