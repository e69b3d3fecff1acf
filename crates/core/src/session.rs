//! Operator-driven matching session.
//!
//! Phases run in order: configure the baseline label, extract baseline
//! signatures, optionally load a prior database, then scan target binaries
//! until the operator stops, and finally deduplicate and persist. All operator
//! interaction goes through a [`Prompter`], so the same driver serves the
//! interactive CLI, scripted flag runs, and tests.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::config::MatchConfig;
use crate::db::{load_database, save_database, DbError, DbStats, LedgerError, MatchDatabase};
use crate::db::{ScanLedger, ScanRecord};
use crate::services::analysis::BinaryView;
use crate::signature::{extract_all, scan_file, ExtractOptions, ScanOutcome};

/// Operator surface. `None` means "no selection" and ends the current step.
pub trait Prompter {
    fn text(&mut self, title: &str, prompt: &str) -> Option<String>;
    fn open_path(&mut self, prompt: &str) -> Option<PathBuf>;
    fn save_path(&mut self, prompt: &str) -> Option<PathBuf>;
    fn notify(&mut self, message: &str);
}

/// Prompter that replays canned answers in order and records every message.
///
/// An empty answer to a path prompt counts as no selection; running out of
/// answers behaves like the operator closing the dialog.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    messages: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { answers: answers.into_iter().map(Into::into).collect(), messages: Vec::new() }
    }

    pub fn push(&mut self, answer: impl Into<String>) -> &mut Self {
        self.answers.push_back(answer.into());
        self
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        self.answers.pop_front().filter(|a| !a.trim().is_empty()).map(PathBuf::from)
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&mut self, _title: &str, _prompt: &str) -> Option<String> {
        self.answers.pop_front()
    }

    fn open_path(&mut self, _prompt: &str) -> Option<PathBuf> {
        self.next_path()
    }

    fn save_path(&mut self, _prompt: &str) -> Option<PathBuf> {
        self.next_path()
    }

    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open scan ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Failed to save results: {0}")]
    Save(#[source] DbError),
}

/// Settings for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub match_config: MatchConfig,
    /// Persist the deduplicated database here after every merge.
    pub checkpoint: Option<PathBuf>,
    /// Append every scan to this SQLite ledger.
    pub ledger: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(match_config: MatchConfig) -> Self {
        Self { match_config, checkpoint: None, ledger: None }
    }

    pub fn with_checkpoint(mut self, path: Option<PathBuf>) -> Self {
        self.checkpoint = path;
        self
    }

    pub fn with_ledger(mut self, path: Option<PathBuf>) -> Self {
        self.ledger = path;
        self
    }
}

/// Result of a session that ran to the end.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub baseline_variant: String,
    /// Baseline functions that yielded a signature.
    pub signatures: usize,
    pub scans: Vec<ScanOutcome>,
    /// Final (deduplicated) database, whether or not it was saved.
    pub database: MatchDatabase,
    pub stats: DbStats,
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(SessionSummary),
    /// Stopped before scanning: invalid baseline label or unreadable prior results.
    Aborted(String),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }
}

fn confirmed(answer: Option<String>) -> bool {
    answer.is_some_and(|a| a.trim().eq_ignore_ascii_case("y"))
}

/// Drive a full session against the loaded baseline `view`.
pub fn run_session(
    view: &dyn BinaryView,
    prompter: &mut dyn Prompter,
    config: &SessionConfig,
) -> Result<SessionOutcome, SessionError> {
    let variants = &config.match_config.variants;

    // Configure baseline.
    if let Some(path) = view.path() {
        prompter.notify(&format!("Using current view as baseline: {}", path.display()));
    }
    prompter.notify(&format!("Available types: {}", variants.describe()));
    let Some(answer) = prompter.text(
        "Base Type",
        &format!("Enter the type of the base file (default: {}):", variants.default_label()),
    ) else {
        let reason = "No base type entered.".to_string();
        prompter.notify(&reason);
        return Ok(SessionOutcome::Aborted(reason));
    };
    let baseline = match variants.resolve_baseline(&answer) {
        Ok(label) => label,
        Err(err) => {
            prompter.notify(&err.to_string());
            return Ok(SessionOutcome::Aborted(err.to_string()));
        }
    };
    prompter.notify(&format!("Using {baseline} as base type"));

    // Extract baseline.
    let options = ExtractOptions::from_config(&config.match_config, view);
    let signatures = {
        let _span = info_span!("extract", baseline = %baseline, range = %options.code_range).entered();
        extract_all(view, &options)
    };
    prompter.notify(&format!(
        "Generated signatures for {} functions in baseline file",
        signatures.len()
    ));

    // Load existing results.
    let mut db = MatchDatabase::new();
    if confirmed(prompter.text("Use Existing Results", "Load existing results file? (Y/N):")) {
        if let Some(path) = prompter.open_path("Select existing JSON file") {
            match load_database(&path) {
                Ok(loaded) => {
                    prompter.notify(&format!(
                        "Loaded {} existing matches from {}",
                        loaded.len(),
                        path.display()
                    ));
                    db = loaded;
                }
                Err(err) => {
                    let reason = format!("Error loading existing JSON file: {err}");
                    prompter.notify(&reason);
                    return Ok(SessionOutcome::Aborted(reason));
                }
            }
        }
    }

    // Scan loop.
    let ledger = config.ledger.as_deref().map(ScanLedger::open).transpose()?;
    let mut exclusions = db.exclusions_for(&baseline);
    let mut scans = Vec::new();
    loop {
        let Some(target) = prompter.open_path("Select binary file to analyze") else {
            prompter.notify("No file selected.");
            break;
        };
        prompter.notify(&format!("Available types: {}", variants.describe()));
        let Some(answer) = prompter.text("Binary Type", "Enter binary type:") else {
            break;
        };
        let variant = match variants.validate(answer.trim()) {
            Ok(v) => v.to_string(),
            Err(err) => {
                prompter.notify(&err.to_string());
                continue;
            }
        };

        let _span = info_span!("scan", path = %target.display(), variant = %variant).entered();
        let started = Utc::now();
        let outcome = scan_file(&target, &signatures, &variant, &exclusions);
        if let Some(err) = &outcome.error {
            prompter.notify(err);
        }

        let merged = db.merge_found(&outcome.hits, &signatures, &baseline, &variant);
        exclusions.extend(outcome.hits.iter().map(|h| (h.clone(), variant.clone())));
        prompter.notify(&format!(
            "Found {} matches in {variant} ({} new records, {} updated)",
            outcome.hits.len(),
            merged.created,
            merged.updated
        ));

        if let Some(ledger) = &ledger {
            let record = ScanRecord::from_outcome(&baseline, &outcome, started);
            if let Err(err) = ledger.record_scan(&record) {
                warn!(error = %err, "failed to record scan in ledger");
            }
        }
        if let Some(path) = &config.checkpoint {
            match save_database(&db.clone().dedup(), path) {
                Ok(()) => debug!(path = %path.display(), "checkpoint written"),
                Err(err) => {
                    warn!(error = %err, "checkpoint failed");
                    prompter.notify(&format!("Checkpoint failed: {err}"));
                }
            }
        }
        scans.push(outcome);

        if !confirmed(prompter.text("Continue", "Process another binary? (Y/N):")) {
            break;
        }
    }

    // Finalize.
    let mut saved_to = None;
    if db.is_empty() {
        prompter.notify("No matches found.");
    } else {
        let before = db.len();
        db = db.dedup();
        prompter.notify(&format!("Deduplicated {before} matches to {} unique entries", db.len()));
        match prompter.save_path("Save output JSON file") {
            Some(path) => {
                save_database(&db, &path).map_err(SessionError::Save)?;
                prompter.notify(&format!("Results saved to {}", path.display()));
                prompter.notify(&format!("Total unique matches found: {}", db.len()));
                saved_to = Some(path);
            }
            None => prompter.notify("No output path selected; results were not saved."),
        }
    }

    let stats = db.stats();
    info!(baseline = %baseline, records = stats.records, scans = scans.len(), "session finished");
    Ok(SessionOutcome::Completed(SessionSummary {
        baseline_variant: baseline,
        signatures: signatures.len(),
        scans,
        database: db,
        stats,
        saved_to,
    }))
}
