use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

use crate::signature::ScanOutcome;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for scan ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The ledger was written by a newer version of this tool.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One scanned target binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    pub baseline_variant: String,
    pub target_path: String,
    pub target_sha256: Option<String>,
    pub target_variant: String,
    pub candidates: i64,
    pub hits: i64,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

impl ScanRecord {
    /// Describe a finished scan; `finished_at` is now.
    pub fn from_outcome(
        baseline_variant: &str,
        outcome: &ScanOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            baseline_variant: baseline_variant.to_string(),
            target_path: outcome.path.to_string_lossy().to_string(),
            target_sha256: outcome.image_sha256.clone(),
            target_variant: outcome.variant.clone(),
            candidates: outcome.tested as i64,
            hits: outcome.hits.len() as i64,
            error: outcome.error.clone(),
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
        }
    }
}

/// SQLite-backed history of scans across sessions.
#[derive(Debug)]
pub struct ScanLedger {
    conn: Connection,
}

impl ScanLedger {
    /// Open (or create) a ledger at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Append a scan and return its row id.
    pub fn record_scan(&self, record: &ScanRecord) -> LedgerResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO scans (baseline_variant, target_path, target_sha256, target_variant,
                               candidates, hits, error, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.baseline_variant,
                record.target_path,
                record.target_sha256,
                record.target_variant,
                record.candidates,
                record.hits,
                record.error,
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List scans in insertion order, optionally only those of one target variant.
    pub fn list_scans(&self, variant: Option<&str>) -> LedgerResult<Vec<ScanRecord>> {
        fn map_scan(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanRecord> {
            Ok(ScanRecord {
                baseline_variant: row.get(0)?,
                target_path: row.get(1)?,
                target_sha256: row.get(2)?,
                target_variant: row.get(3)?,
                candidates: row.get(4)?,
                hits: row.get(5)?,
                error: row.get(6)?,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT baseline_variant, target_path, target_sha256, target_variant,
                   candidates, hits, error, started_at, finished_at
            FROM scans
            WHERE ?1 IS NULL OR target_variant = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![variant], map_scan)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Apply schema migrations, tracked through `PRAGMA user_version`.
///
/// Version map:
/// - 0: no schema
/// - 1: scans table
/// - 2: error column on scans
fn apply_migrations(conn: &Connection) -> LedgerResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(LedgerError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS scans (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                baseline_variant TEXT NOT NULL,
                target_path      TEXT NOT NULL,
                target_sha256    TEXT,
                target_variant   TEXT NOT NULL,
                candidates       INTEGER NOT NULL,
                hits             INTEGER NOT NULL,
                started_at       TEXT NOT NULL,
                finished_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS scans_target_variant ON scans (target_variant);
            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version == 1 {
        if !column_exists(conn, "scans", "error")? {
            conn.execute("ALTER TABLE scans ADD COLUMN error TEXT;", [])?;
        }
        conn.execute("PRAGMA user_version = 2;", [])?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> LedgerResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> LedgerResult<bool> {
    let pragma = format!("PRAGMA table_info({table});");
    let mut stmt = conn.prepare(&pragma)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in rows {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
