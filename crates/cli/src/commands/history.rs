use std::path::Path;

use anyhow::{Context, Result};
use sigprop_core::db::ScanLedger;

/// List scans recorded in a ledger, optionally for one target variant.
pub fn history_command(ledger: &Path, variant: Option<&str>, json: bool) -> Result<()> {
    let ledger = ScanLedger::open(ledger)
        .with_context(|| format!("Failed to open scan ledger {}", ledger.display()))?;
    let scans = ledger.list_scans(variant).context("Failed to list scans")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scans)?);
        return Ok(());
    }

    println!("Scans ({}):", scans.len());
    if scans.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for scan in scans {
        let status = match &scan.error {
            Some(err) => format!("error: {err}"),
            None => format!("{} hits / {} tested", scan.hits, scan.candidates),
        };
        println!(
            "  - {} [{} vs {}] {} ({})",
            scan.target_path, scan.target_variant, scan.baseline_variant, status, scan.finished_at
        );
    }
    Ok(())
}
