#[path = "../../core/tests/common/mod.rs"]
mod common;

use std::fs;
use std::path::PathBuf;

use common::{long_body, sbpf_elf};
use sigprop::commands::{
    parse_target, run_with_prompter, scripted_answers, validate_targets, MatchArgs, StdinPrompter,
    TargetSpec,
};
use sigprop_core::db::load_database;
use sigprop_core::model::VariantSet;
use sigprop_core::session::{ScriptedPrompter, SessionConfig, SessionOutcome};
use tempfile::tempdir;

#[test]
fn parse_target_splits_on_last_equals() {
    let spec = parse_target("builds/a=b.so=Anchor").expect("parse");
    assert_eq!(spec, TargetSpec { path: PathBuf::from("builds/a=b.so"), variant: "Anchor".into() });

    assert!(parse_target("prog.so").is_err());
    assert!(parse_target("=Anchor").is_err());
    assert!(parse_target("prog.so=").is_err());
}

#[test]
fn scripted_answers_follow_prompt_order() {
    let args = MatchArgs {
        baseline: PathBuf::from("base.so"),
        existing: Some(PathBuf::from("old.json")),
        baseline_variant: Some("Anchor".into()),
        targets: vec![
            TargetSpec { path: PathBuf::from("a.so"), variant: "Native".into() },
            TargetSpec { path: PathBuf::from("b.so"), variant: "Pinocchio".into() },
        ],
        output: Some(PathBuf::from("out.json")),
        ..MatchArgs::default()
    };

    assert_eq!(
        scripted_answers(&args),
        vec!["Anchor", "Y", "old.json", "a.so", "Native", "Y", "b.so", "Pinocchio", "N", "out.json"]
    );
}

#[test]
fn scripted_answers_without_targets_finish_immediately() {
    let args = MatchArgs { baseline: PathBuf::from("base.so"), ..MatchArgs::default() };
    assert_eq!(scripted_answers(&args), vec!["", "N", "", ""]);
}

#[test]
fn run_with_prompter_reports_missing_baseline() {
    let dir = tempdir().expect("tempdir");
    let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
    let err = run_with_prompter(&dir.path().join("nope.so"), &SessionConfig::default(), &mut prompter)
        .expect_err("missing baseline");
    assert!(err.to_string().contains("Failed to load binary"));
}

#[test]
fn stdin_prompter_drives_a_full_session() {
    let dir = tempdir().expect("tempdir");
    let baseline = dir.path().join("base.so");
    fs::write(&baseline, sbpf_elf(&long_body(3), &[("process", 0)])).expect("write baseline");
    let target = dir.path().join("target.bin");
    fs::write(&target, long_body(3)).expect("write target");
    let out = dir.path().join("db.json");

    let input = format!("\nN\n{}\nAnchor\nN\n{}\n", target.display(), out.display());
    let mut prompter = StdinPrompter::new(input.as_bytes(), Vec::new());
    let outcome =
        run_with_prompter(&baseline, &SessionConfig::default(), &mut prompter).expect("session");

    let SessionOutcome::Completed(summary) = outcome else {
        panic!("session aborted");
    };
    assert_eq!(summary.baseline_variant, "Native");
    assert_eq!(summary.saved_to.as_deref(), Some(out.as_path()));

    let transcript = String::from_utf8(prompter.into_writer()).expect("utf8");
    assert!(transcript.contains("Using Native as base type"));
    assert!(transcript.contains("Found 1 matches in Anchor"));

    let db = load_database(&out).expect("load db");
    assert_eq!(db.len(), 1);
    assert_eq!(db.records()[0].name, "process");
}

#[test]
fn validate_targets_rejects_unknown_label_before_scripting() {
    let variants = VariantSet::default();
    let targets = vec![
        TargetSpec { path: PathBuf::from("a.bin"), variant: "bogus".into() },
        TargetSpec { path: PathBuf::from("b.bin"), variant: "Anchor".into() },
    ];

    let err = validate_targets(&variants, &targets).expect_err("bogus label");
    let chain = format!("{err:#}");
    assert!(chain.contains("Invalid --target a.bin"));
    assert!(chain.contains("Invalid variant 'bogus'"));

    assert!(validate_targets(&variants, &targets[1..]).is_ok());
}

#[test]
fn scripted_run_with_valid_targets_scans_each_and_saves() {
    let dir = tempdir().expect("tempdir");
    let baseline = dir.path().join("base.so");
    fs::write(&baseline, sbpf_elf(&long_body(3), &[("process", 0)])).expect("write baseline");
    let first = dir.path().join("a.bin");
    let second = dir.path().join("b.bin");
    fs::write(&first, long_body(3)).expect("write first");
    fs::write(&second, long_body(3)).expect("write second");
    let out = dir.path().join("db.json");

    let args = MatchArgs {
        baseline: baseline.clone(),
        targets: vec![
            TargetSpec { path: first, variant: "Anchor".into() },
            TargetSpec { path: second, variant: "Pinocchio".into() },
        ],
        output: Some(out.clone()),
        ..MatchArgs::default()
    };
    validate_targets(&VariantSet::default(), &args.targets).expect("labels");

    let mut prompter = ScriptedPrompter::new(scripted_answers(&args));
    let outcome =
        run_with_prompter(&baseline, &SessionConfig::default(), &mut prompter).expect("session");
    let SessionOutcome::Completed(summary) = outcome else {
        panic!("session aborted");
    };
    assert_eq!(summary.scans.len(), 2);
    assert_eq!(summary.saved_to.as_deref(), Some(out.as_path()));

    let db = load_database(&out).expect("load db");
    let found: Vec<&str> = db.records()[0].found_in.iter().map(String::as_str).collect();
    assert_eq!(found, vec!["Anchor", "Native", "Pinocchio"]);
}
