use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::Connection;
use sigprop_core::db::ledger::CURRENT_SCHEMA_VERSION;
use sigprop_core::db::{LedgerError, ScanLedger, ScanRecord};
use sigprop_core::signature::ScanOutcome;

fn outcome(variant: &str, hits: usize, error: Option<&str>) -> ScanOutcome {
    ScanOutcome {
        path: PathBuf::from(format!("/tmp/{variant}.so")),
        variant: variant.to_string(),
        tested: 5,
        hits: (0..hits).map(|i| format!("hash{i}")).collect::<HashSet<_>>(),
        image_sha256: error.is_none().then(|| "ab".repeat(32)),
        error: error.map(str::to_string),
    }
}

#[test]
fn records_and_lists_scans_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = ScanLedger::open(&dir.path().join("scans.db")).expect("open");
    let started = Utc::now();

    ledger.record_scan(&ScanRecord::from_outcome("Native", &outcome("Anchor", 3, None), started)).expect("insert");
    ledger
        .record_scan(&ScanRecord::from_outcome("Native", &outcome("Pinocchio", 0, Some("boom")), started))
        .expect("insert");

    let all = ledger.list_scans(None).expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].target_variant, "Anchor");
    assert_eq!(all[0].hits, 3);
    assert_eq!(all[0].candidates, 5);
    assert_eq!(all[0].target_sha256.as_deref(), Some("ab".repeat(32).as_str()));
    assert_eq!(all[1].error.as_deref(), Some("boom"));

    let pino = ledger.list_scans(Some("Pinocchio")).expect("filter");
    assert_eq!(pino.len(), 1);
    assert_eq!(pino[0].target_path, "/tmp/Pinocchio.so");
}

#[test]
fn reopening_keeps_history_and_schema_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scans.db");
    {
        let ledger = ScanLedger::open(&path).expect("open");
        ledger.record_scan(&ScanRecord::from_outcome("Native", &outcome("Anchor", 1, None), Utc::now())).expect("insert");
    }
    let ledger = ScanLedger::open(&path).expect("reopen");
    assert_eq!(ledger.list_scans(None).expect("list").len(), 1);
    let version: i32 =
        ledger.connection().query_row("PRAGMA user_version;", [], |row| row.get(0)).expect("version");
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn version_one_ledgers_gain_the_error_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("old.db");
    {
        let conn = Connection::open(&path).expect("sqlite");
        conn.execute_batch(
            r#"
            CREATE TABLE scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                baseline_variant TEXT NOT NULL,
                target_path TEXT NOT NULL,
                target_sha256 TEXT,
                target_variant TEXT NOT NULL,
                candidates INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            INSERT INTO scans (baseline_variant, target_path, target_variant, candidates, hits, started_at, finished_at)
            VALUES ('Native', 'a.so', 'Anchor', 2, 1, 't0', 't1');
            PRAGMA user_version = 1;
            "#,
        )
        .expect("seed v1");
    }

    let ledger = ScanLedger::open(&path).expect("migrate");
    let scans = ledger.list_scans(None).expect("list");
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].error, None);
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("future.db");
    {
        let conn = Connection::open(&path).expect("sqlite");
        conn.execute_batch("PRAGMA user_version = 99;").expect("bump");
    }

    let err = ScanLedger::open(&path).unwrap_err();
    match err {
        LedgerError::UnsupportedSchemaVersion { found, max_supported, .. } => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("unexpected error: {other}"),
    }
}
