use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use sigprop_core::model::VariantSet;
use sigprop_core::session::{
    run_session, Prompter, ScriptedPrompter, SessionConfig, SessionOutcome, SessionSummary,
};

use crate::commands::StdinPrompter;
use crate::{load_binary, resolve_config};

/// A `PATH=VARIANT` pair given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub path: PathBuf,
    pub variant: String,
}

/// clap value parser for `--target`.
pub fn parse_target(text: &str) -> Result<TargetSpec, String> {
    match text.rsplit_once('=') {
        Some((path, variant)) if !path.is_empty() && !variant.is_empty() => {
            Ok(TargetSpec { path: PathBuf::from(path), variant: variant.to_string() })
        }
        _ => Err(format!("expected PATH=VARIANT, got '{text}'")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchArgs {
    pub baseline: PathBuf,
    pub config: Option<PathBuf>,
    pub backend: Option<String>,
    pub existing: Option<PathBuf>,
    pub baseline_variant: Option<String>,
    pub targets: Vec<TargetSpec>,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
}

/// Answers that replay `args` through the session's prompts, in prompt order.
pub fn scripted_answers(args: &MatchArgs) -> Vec<String> {
    let mut answers = vec![args.baseline_variant.clone().unwrap_or_default()];
    match &args.existing {
        Some(path) => {
            answers.push("Y".to_string());
            answers.push(path_answer(path));
        }
        None => answers.push("N".to_string()),
    }
    for (idx, target) in args.targets.iter().enumerate() {
        answers.push(path_answer(&target.path));
        answers.push(target.variant.clone());
        let more = idx + 1 < args.targets.len();
        answers.push(if more { "Y" } else { "N" }.to_string());
    }
    if args.targets.is_empty() {
        answers.push(String::new());
    }
    answers.push(args.output.as_deref().map(path_answer).unwrap_or_default());
    answers
}

/// Reject `--target` labels outside `variants` before any scan runs; a bad
/// label would otherwise shift every later scripted answer.
pub fn validate_targets(variants: &VariantSet, targets: &[TargetSpec]) -> Result<()> {
    for target in targets {
        variants
            .validate(&target.variant)
            .with_context(|| format!("Invalid --target {}", target.path.display()))?;
    }
    Ok(())
}

fn path_answer(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Run a matching session: interactive when no targets are given on the
/// command line, otherwise scripted from the flags.
pub fn match_command(args: MatchArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref(), args.backend.as_deref())?;
    validate_targets(&config.variants, &args.targets)?;
    let session = SessionConfig::new(config)
        .with_checkpoint(args.checkpoint.clone())
        .with_ledger(args.ledger.clone());

    tracing::debug!(targets = args.targets.len(), baseline = %args.baseline.display(), "starting match session");

    let outcome = if args.targets.is_empty() {
        let mut prompter = StdinPrompter::stdio();
        run_with_prompter(&args.baseline, &session, &mut prompter)?
    } else {
        let mut prompter = ScriptedPrompter::new(scripted_answers(&args));
        let outcome = run_with_prompter(&args.baseline, &session, &mut prompter);
        for message in prompter.messages() {
            println!("{message}");
        }
        outcome?
    };

    match outcome {
        SessionOutcome::Completed(summary) => {
            print_summary(&summary);
            Ok(())
        }
        SessionOutcome::Aborted(reason) => Err(anyhow!("Session aborted: {reason}")),
    }
}

/// Load `baseline` and run a session against it with the given prompter.
pub fn run_with_prompter(
    baseline: &Path,
    session: &SessionConfig,
    prompter: &mut dyn Prompter,
) -> Result<SessionOutcome> {
    let view = load_binary(baseline, &session.match_config)?;
    Ok(run_session(&view, prompter, session)?)
}

fn print_summary(summary: &SessionSummary) {
    println!();
    println!("Baseline: {} ({} signatures)", summary.baseline_variant, summary.signatures);
    println!("Binaries scanned: {}", summary.scans.len());
    println!("Records: {}", summary.stats.records);
    for (variant, count) in &summary.stats.per_variant {
        println!("  {variant}: {count}");
    }
}
