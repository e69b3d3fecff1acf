use anyhow::Result;
use serde::Serialize;

use sigprop_core::services::analysis::default_backend_registry;

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub description: String,
}

/// List loader backends compiled into this binary.
pub fn list_backends_command(json: bool) -> Result<()> {
    let registry = default_backend_registry();
    let entries: Vec<BackendInfo> = registry
        .names()
        .into_iter()
        .map(|name| {
            let description = match name.as_str() {
                "sbpf" => "Solana sBPF ELF programs (built-in decoder)".to_string(),
                "capstone" => "ELF/PE/Mach-O via Capstone (x86, x86_64, ARM, AArch64)".to_string(),
                other => format!("Backend '{other}'"),
            };
            BackendInfo { name, description }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Backends:");
    for entry in entries {
        println!("- {}: {}", entry.name, entry.description);
    }
    Ok(())
}
