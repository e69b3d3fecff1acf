use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sigprop::commands::{
    dedup_command, extract_command, history_command, list_backends_command,
    list_variants_command, match_command, parse_target, rename_command, MatchArgs, TargetSpec,
};

/// Propagate function names across related builds by matching instruction prefixes.
///
/// This CLI is a thin wrapper around `sigprop-core`; all substantive logic
/// lives in the library.
#[derive(Parser, Debug)]
#[command(name = "sigprop", version, about = "Prefix-signature function matching", long_about = None)]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract signatures from a baseline binary.
    Extract {
        /// Baseline binary.
        #[arg(long)]
        baseline: PathBuf,

        /// Config file (YAML or JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Loader backend override (sbpf, capstone).
        #[arg(long)]
        backend: Option<String>,

        /// Write the signature list here instead of printing a summary.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Scan target binaries for baseline signatures and build a match database.
    ///
    /// Without `--target` the session prompts for every input on stdin;
    /// `--existing`, `--baseline-variant` and `--output` only apply with `--target`.
    Match {
        /// Baseline binary.
        #[arg(long)]
        baseline: PathBuf,

        /// Config file (YAML or JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Loader backend override (sbpf, capstone).
        #[arg(long)]
        backend: Option<String>,

        /// Existing match database to extend.
        #[arg(long, requires = "targets")]
        existing: Option<PathBuf>,

        /// Variant label of the baseline (defaults to the first configured label).
        #[arg(long, requires = "targets")]
        baseline_variant: Option<String>,

        /// Target binary and its variant, as PATH=VARIANT. Repeatable.
        #[arg(long = "target", value_parser = parse_target)]
        targets: Vec<TargetSpec>,

        /// Where to save the final database.
        #[arg(long, requires = "targets")]
        output: Option<PathBuf>,

        /// Save the database here after every scanned binary.
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// SQLite scan ledger to append to.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Rename functions in a binary from a saved signature list.
    Rename {
        /// Binary whose functions are renamed.
        #[arg(long)]
        binary: PathBuf,

        /// Signature list or match database (JSON).
        #[arg(long)]
        signatures: PathBuf,

        /// Config file (YAML or JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Loader backend override (sbpf, capstone).
        #[arg(long)]
        backend: Option<String>,

        /// Leave functions unchanged when differently named signatures match.
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Write the applied renames as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Collapse duplicate records in a saved match database.
    Dedup {
        #[arg(long)]
        input: PathBuf,

        /// Output path; prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the configured variant labels.
    Variants {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List loader backends available in this build.
    Backends {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show scans recorded in a scan ledger.
    History {
        #[arg(long)]
        ledger: PathBuf,

        /// Only scans of this target variant.
        #[arg(long)]
        variant: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    sigprop_core::logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Extract { baseline, config, backend, output } => {
            extract_command(&baseline, config.as_deref(), backend.as_deref(), output.as_deref())?
        }
        Command::Match {
            baseline,
            config,
            backend,
            existing,
            baseline_variant,
            targets,
            output,
            checkpoint,
            ledger,
        } => match_command(MatchArgs {
            baseline,
            config,
            backend,
            existing,
            baseline_variant,
            targets,
            output,
            checkpoint,
            ledger,
        })?,
        Command::Rename { binary, signatures, config, backend, strict, output } => rename_command(
            &binary,
            &signatures,
            config.as_deref(),
            backend.as_deref(),
            strict,
            output.as_deref(),
        )?,
        Command::Dedup { input, output } => dedup_command(&input, output.as_deref())?,
        Command::Variants { config } => list_variants_command(config.as_deref())?,
        Command::Backends { json } => list_backends_command(json)?,
        Command::History { ledger, variant, json } => {
            history_command(&ledger, variant.as_deref(), json)?
        }
    }

    Ok(())
}
