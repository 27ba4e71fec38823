use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod models;
use models::*;

use crate::sync::merge::{MergeReport, Resolution};
use crate::sync::validate::ValidationResult;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("snapshot store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What `publish` did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Candidate is current; rotation happened if it was requested
    Promoted,
    /// Candidate failed validation; nothing changed
    SkippedInvalid,
    /// Candidate is current, but current→previous was held back because
    /// part of the fetch failed
    SkippedRotationGuard,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A candidate ready for `publish_against_current`.
#[derive(Debug, Clone)]
pub struct PreparedPublish {
    pub candidate: Snapshot,
    pub validation: ValidationResult,
    pub options: PublishOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub rotate: bool,
    /// The cycle served some teams from history or dropped them
    pub incomplete_fetch: bool,
    /// Keep invalid candidates for operator inspection
    pub keep_rejected: bool,
}

/// Point inside the publish transaction, exposed so tests can interrupt it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishStep {
    Rotated,
    Written,
}

/// One row of the sync-cycle audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    pub fresh_accepted: i64,
    pub rolled_back: i64,
    pub fallback: i64,
    pub missing: i64,
    pub violations: Vec<String>,
    pub report: MergeReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedSnapshot {
    pub id: i64,
    pub snapshot_date: DateTime<Utc>,
    pub rejected_at: DateTime<Utc>,
    pub team_count: usize,
    pub violations: Vec<String>,
}

/// Durable home of the `current`, `previous` and `last-gameweek` slots.
///
/// Each slot holds the JSON array of team records. Every promotion is a
/// single SQLite transaction, so any reader sees either the full old pair or
/// the full new pair, and a crash or write error leaves the pre-cycle state.
#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        // Another process may hold the write lock for the length of a publish
        conn.busy_timeout(Duration::from_secs(30))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(SnapshotStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Slots ────────────────────────────────────────────────────────────────

    /// Read one slot; `None` if it has never been written.
    pub fn read(&self, slot: Generation) -> Result<Option<Snapshot>> {
        let conn = self.lock()?;
        read_slot(&conn, slot)
    }

    /// Read two slots from one consistent view.
    pub fn read_pair(
        &self,
        first: Generation,
        second: Generation,
    ) -> Result<(Option<Snapshot>, Option<Snapshot>)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let a = read_slot(&tx, first)?;
        let b = read_slot(&tx, second)?;
        tx.commit()?;
        Ok((a, b))
    }

    /// Read every promoted slot from one consistent view.
    pub fn read_all(&self) -> Result<PublishedSlots> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let slots = PublishedSlots {
            current: read_slot(&tx, Generation::Current)?,
            previous: read_slot(&tx, Generation::Previous)?,
            last_gameweek: read_slot(&tx, Generation::LastGameweek)?,
        };
        tx.commit()?;
        Ok(slots)
    }

    /// Stored JSON body of a slot, exactly as written.
    pub fn raw_body(&self, slot: Generation) -> Result<Option<String>> {
        let conn = self.lock()?;
        let body = conn
            .query_row(
                "SELECT body FROM snapshots WHERE slot = ?1",
                params![slot.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    // ── Promotion ────────────────────────────────────────────────────────────

    /// Promote a validated candidate to `current`.
    pub fn publish(
        &self,
        candidate: &Snapshot,
        validation: &ValidationResult,
        options: PublishOptions,
    ) -> Result<PublishOutcome> {
        let prepared = || PreparedPublish {
            candidate: candidate.clone(),
            validation: validation.clone(),
            options,
        };
        self.publish_with_checkpoint(|_| (prepared(), ()), |_| Ok(()))
            .map(|(outcome, ())| outcome)
    }

    /// Build and publish a candidate against the `current` slot as it is
    /// inside the write transaction.
    ///
    /// `prepare` runs after `BEGIN IMMEDIATE`, so no other writer (another
    /// process on the same database included) can promote between reading the
    /// baseline and replacing it. Whatever `prepare` returns besides the
    /// candidate is passed back to the caller.
    pub fn publish_against_current<P, T>(&self, prepare: P) -> Result<(PublishOutcome, T)>
    where
        P: FnOnce(Option<Snapshot>) -> (PreparedPublish, T),
    {
        self.publish_with_checkpoint(prepare, |_| Ok(()))
    }

    fn publish_with_checkpoint<P, T, F>(&self, prepare: P, checkpoint: F) -> Result<(PublishOutcome, T)>
    where
        P: FnOnce(Option<Snapshot>) -> (PreparedPublish, T),
        F: Fn(PublishStep) -> Result<()>,
    {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls everything back
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let baseline = read_slot(&tx, Generation::Current)?;
        let (
            PreparedPublish {
                candidate,
                validation,
                options,
            },
            extra,
        ) = prepare(baseline);

        if !validation.passed() {
            warn!(
                "Candidate rejected with {} violation(s); current snapshot left untouched",
                validation.violations.len()
            );
            if options.keep_rejected {
                insert_rejected(&tx, &candidate, &validation)?;
                tx.commit()?;
            }
            return Ok((PublishOutcome::SkippedInvalid, extra));
        }

        let rotate = options.rotate && !options.incomplete_fetch;
        let body = serde_json::to_string(&candidate.teams)?;
        let now = Utc::now();

        if rotate {
            let moved = rotate_current(&tx, now)?;
            debug!("Rotated current → previous ({} row)", moved);
        }
        checkpoint(PublishStep::Rotated)?;
        write_slot(&tx, Generation::Current, candidate.snapshot_date, &body, now)?;
        checkpoint(PublishStep::Written)?;
        tx.commit()?;

        let outcome = if options.rotate && options.incomplete_fetch {
            warn!("Rotation skipped: some teams were not fetched this cycle");
            PublishOutcome::SkippedRotationGuard
        } else {
            PublishOutcome::Promoted
        };
        info!(
            "Published {} team(s) as current ({}, rotated={})",
            candidate.len(),
            outcome,
            rotate
        );
        Ok((outcome, extra))
    }

    /// Copy `current` into `last-gameweek`. Run once per reporting week, not
    /// on every sync. Returns false when there is no current snapshot yet.
    pub fn promote_gameweek(&self) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let copied = tx.execute(
            "INSERT INTO snapshots (slot, snapshot_date, body, promoted_at)
             SELECT ?1, snapshot_date, body, ?2 FROM snapshots WHERE slot = 'current'
             ON CONFLICT(slot) DO UPDATE SET
                snapshot_date = excluded.snapshot_date,
                body = excluded.body,
                promoted_at = excluded.promoted_at",
            params![Generation::LastGameweek.as_str(), Utc::now()],
        )?;
        tx.commit()?;
        if copied > 0 {
            info!("Promoted current snapshot to last-gameweek");
        }
        Ok(copied > 0)
    }

    // ── Rejected candidates ─────────────────────────────────────────────────

    pub fn list_rejected(&self, limit: i64) -> Result<Vec<RejectedSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, snapshot_date, rejected_at, body, violations
             FROM rejected_snapshots ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, snapshot_date, rejected_at, body, violations)| {
                let teams: Vec<TeamRecord> = serde_json::from_str(&body)?;
                Ok(RejectedSnapshot {
                    id,
                    snapshot_date,
                    rejected_at,
                    team_count: teams.len(),
                    violations: serde_json::from_str(&violations)?,
                })
            })
            .collect()
    }

    // ── Sync cycle audit log ────────────────────────────────────────────────

    pub fn record_cycle(&self, cycle: &CycleRecord) -> Result<i64> {
        let report = serde_json::to_string(&cycle.report)?;
        let violations = serde_json::to_string(&cycle.violations)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_cycles (
                started_at, finished_at, outcome, fresh_accepted, rolled_back,
                fallback, missing, violations, report
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                cycle.started_at,
                cycle.finished_at,
                cycle.outcome,
                cycle.fresh_accepted,
                cycle.rolled_back,
                cycle.fallback,
                cycle.missing,
                violations,
                report,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_cycles(&self, limit: i64) -> Result<Vec<CycleRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, outcome, fresh_accepted, rolled_back,
                    fallback, missing, violations, report
             FROM sync_cycles ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    CycleRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        outcome: row.get(3)?,
                        fresh_accepted: row.get(4)?,
                        rolled_back: row.get(5)?,
                        fallback: row.get(6)?,
                        missing: row.get(7)?,
                        violations: Vec::new(),
                        report: MergeReport::default(),
                    },
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(mut cycle, violations, report)| {
                cycle.violations = serde_json::from_str(&violations)?;
                cycle.report = serde_json::from_str(&report)?;
                Ok(cycle)
            })
            .collect()
    }
}

/// All three slots as seen at one instant.
#[derive(Debug, Clone, Default)]
pub struct PublishedSlots {
    pub current: Option<Snapshot>,
    pub previous: Option<Snapshot>,
    pub last_gameweek: Option<Snapshot>,
}

impl CycleRecord {
    pub fn new(
        started_at: DateTime<Utc>,
        outcome: &str,
        report: &MergeReport,
        validation: &ValidationResult,
    ) -> Self {
        CycleRecord {
            id: None,
            started_at,
            finished_at: Utc::now(),
            outcome: outcome.to_string(),
            fresh_accepted: report.count(Resolution::FreshAccepted) as i64,
            rolled_back: report.count(Resolution::RolledBackToPrevious) as i64,
            fallback: report.count(Resolution::FallbackToPrevious) as i64,
            missing: report.count(Resolution::CarriedOverMissing) as i64,
            violations: violation_lines(validation),
            report: report.clone(),
        }
    }
}

fn insert_rejected(
    conn: &Connection,
    candidate: &Snapshot,
    validation: &ValidationResult,
) -> Result<()> {
    let body = serde_json::to_string(&candidate.teams)?;
    let violations = serde_json::to_string(&violation_lines(validation))?;
    conn.execute(
        "INSERT INTO rejected_snapshots (snapshot_date, body, violations, rejected_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![candidate.snapshot_date, body, violations, Utc::now()],
    )?;
    Ok(())
}

fn violation_lines(validation: &ValidationResult) -> Vec<String> {
    validation.violations.iter().map(|v| v.to_string()).collect()
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn read_slot(conn: &Connection, slot: Generation) -> Result<Option<Snapshot>> {
    let row: Option<(DateTime<Utc>, String)> = conn
        .query_row(
            "SELECT snapshot_date, body FROM snapshots WHERE slot = ?1",
            params![slot.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((snapshot_date, body)) => Ok(Some(Snapshot {
            snapshot_date,
            generation: slot,
            teams: serde_json::from_str(&body)?,
        })),
        None => Ok(None),
    }
}

fn write_slot(
    tx: &Transaction,
    slot: Generation,
    snapshot_date: DateTime<Utc>,
    body: &str,
    promoted_at: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO snapshots (slot, snapshot_date, body, promoted_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(slot) DO UPDATE SET
            snapshot_date = excluded.snapshot_date,
            body = excluded.body,
            promoted_at = excluded.promoted_at",
        params![slot.as_str(), snapshot_date, body, promoted_at],
    )?;
    Ok(())
}

/// current → previous; a missing current leaves previous as it was.
fn rotate_current(tx: &Transaction, now: DateTime<Utc>) -> Result<usize> {
    let moved = tx.execute(
        "INSERT INTO snapshots (slot, snapshot_date, body, promoted_at)
         SELECT ?1, snapshot_date, body, ?2 FROM snapshots WHERE slot = 'current'
         ON CONFLICT(slot) DO UPDATE SET
            snapshot_date = excluded.snapshot_date,
            body = excluded.body,
            promoted_at = excluded.promoted_at",
        params![Generation::Previous.as_str(), now],
    )?;
    Ok(moved)
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    slot          TEXT PRIMARY KEY,
    snapshot_date TEXT NOT NULL,
    body          TEXT NOT NULL,
    promoted_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rejected_snapshots (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_date TEXT NOT NULL,
    body          TEXT NOT NULL,
    violations    TEXT NOT NULL,
    rejected_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_cycles (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at     TEXT    NOT NULL,
    finished_at    TEXT    NOT NULL,
    outcome        TEXT    NOT NULL,
    fresh_accepted INTEGER NOT NULL,
    rolled_back    INTEGER NOT NULL,
    fallback       INTEGER NOT NULL,
    missing        INTEGER NOT NULL,
    violations     TEXT    NOT NULL,
    report         TEXT    NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::record;
    use crate::sync::validate::{Rule, Violation};

    fn snap(keys: &[&str], status: FixtureStatus) -> Snapshot {
        Snapshot::new(
            Generation::Candidate,
            keys.iter().map(|k| record(k, status, 1.0)).collect(),
        )
    }

    fn pass() -> ValidationResult {
        ValidationResult::default()
    }

    fn fail() -> ValidationResult {
        ValidationResult {
            violations: vec![Violation {
                rule: Rule::TeamCount,
                detail: "snapshot has 24 teams, expected 26".into(),
            }],
        }
    }

    fn rotate() -> PublishOptions {
        PublishOptions {
            rotate: true,
            incomplete_fetch: false,
            keep_rejected: true,
        }
    }

    fn prepared(keys: &[&str]) -> PreparedPublish {
        PreparedPublish {
            candidate: snap(keys, FixtureStatus::Scheduled),
            validation: pass(),
            options: rotate(),
        }
    }

    fn keys(s: &Option<Snapshot>) -> Vec<String> {
        s.as_ref()
            .map(|s| s.teams.iter().map(|t| t.team_key.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_store_has_no_slots() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let slots = store.read_all().unwrap();
        assert!(slots.current.is_none());
        assert!(slots.previous.is_none());
        assert!(slots.last_gameweek.is_none());
    }

    #[test]
    fn test_publish_rotates_current_into_previous() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let first = snap(&["A"], FixtureStatus::Scheduled);
        let second = snap(&["A", "B"], FixtureStatus::Played);

        assert_eq!(
            store.publish(&first, &pass(), rotate()).unwrap(),
            PublishOutcome::Promoted
        );
        assert!(store.read(Generation::Previous).unwrap().is_none());

        store.publish(&second, &pass(), rotate()).unwrap();
        let (current, previous) = store
            .read_pair(Generation::Current, Generation::Previous)
            .unwrap();
        assert_eq!(keys(&current), vec!["A", "B"]);
        assert_eq!(keys(&previous), vec!["A"]);
        assert_eq!(current.unwrap().generation, Generation::Current);
    }

    #[test]
    fn test_publish_without_rotation_keeps_previous() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.publish(&snap(&["A"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        store.publish(&snap(&["B"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        store
            .publish(
                &snap(&["C"], FixtureStatus::Scheduled),
                &pass(),
                PublishOptions::default(),
            )
            .unwrap();
        let slots = store.read_all().unwrap();
        assert_eq!(keys(&slots.current), vec!["C"]);
        assert_eq!(keys(&slots.previous), vec!["A"]);
    }

    #[test]
    fn test_invalid_candidate_never_touches_current() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.publish(&snap(&["A", "B"], FixtureStatus::Played), &pass(), rotate()).unwrap();
        store.publish(&snap(&["A", "B", "C"], FixtureStatus::Played), &pass(), rotate()).unwrap();
        let current_before = store.raw_body(Generation::Current).unwrap();
        let previous_before = store.raw_body(Generation::Previous).unwrap();

        let outcome = store
            .publish(&snap(&["X"], FixtureStatus::Scheduled), &fail(), rotate())
            .unwrap();

        assert_eq!(outcome, PublishOutcome::SkippedInvalid);
        assert_eq!(store.raw_body(Generation::Current).unwrap(), current_before);
        assert_eq!(store.raw_body(Generation::Previous).unwrap(), previous_before);

        let rejected = store.list_rejected(10).unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].team_count, 1);
        assert!(rejected[0].violations[0].contains("24"));
    }

    #[test]
    fn test_rotation_guard_still_promotes_current() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.publish(&snap(&["A"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        store.publish(&snap(&["B"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();

        let guarded = PublishOptions {
            incomplete_fetch: true,
            ..rotate()
        };
        let outcome = store
            .publish(&snap(&["C"], FixtureStatus::Scheduled), &pass(), guarded)
            .unwrap();

        assert_eq!(outcome, PublishOutcome::SkippedRotationGuard);
        let slots = store.read_all().unwrap();
        assert_eq!(keys(&slots.current), vec!["C"]);
        // Baseline still the last fully fetched rotation
        assert_eq!(keys(&slots.previous), vec!["A"]);
    }

    #[test]
    fn test_interrupted_publish_leaves_pre_cycle_state() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.publish(&snap(&["A"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        store.publish(&snap(&["B"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        let before = (
            store.raw_body(Generation::Current).unwrap(),
            store.raw_body(Generation::Previous).unwrap(),
        );

        for step in [PublishStep::Rotated, PublishStep::Written] {
            let result = store.publish_with_checkpoint(
                |_| (prepared(&["C"]), ()),
                |at| {
                    if at == step {
                        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
                    } else {
                        Ok(())
                    }
                },
            );
            assert!(result.is_err());
            let after = (
                store.raw_body(Generation::Current).unwrap(),
                store.raw_body(Generation::Previous).unwrap(),
            );
            assert_eq!(after, before, "state changed after interrupt at {:?}", step);
        }

        // The store is still usable afterwards
        store.publish(&snap(&["C"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        let slots = store.read_all().unwrap();
        assert_eq!(keys(&slots.current), vec!["C"]);
        assert_eq!(keys(&slots.previous), vec!["B"]);
    }

    #[test]
    fn test_crash_mid_publish_recovers_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("league.db");
        let path = path.to_str().unwrap();

        {
            let store = SnapshotStore::open(path).unwrap();
            store.publish(&snap(&["A"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
            store.publish(&snap(&["B"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
            let _ = store.publish_with_checkpoint(
                |_| (prepared(&["C"]), ()),
                |at| match at {
                    PublishStep::Rotated => Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery)),
                    PublishStep::Written => Ok(()),
                },
            );
        }

        let reopened = SnapshotStore::open(path).unwrap();
        let slots = reopened.read_all().unwrap();
        assert_eq!(keys(&slots.current), vec!["B"]);
        assert_eq!(keys(&slots.previous), vec!["A"]);
    }

    #[test]
    fn test_prepare_sees_baseline_promoted_by_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("league.db");
        let path = path.to_str().unwrap();
        let first = SnapshotStore::open(path).unwrap();
        let second = SnapshotStore::open(path).unwrap();

        first.publish(&snap(&["A"], FixtureStatus::Scheduled), &pass(), rotate()).unwrap();
        second.publish(&snap(&["A"], FixtureStatus::Played), &pass(), rotate()).unwrap();

        let (outcome, seen) = first
            .publish_against_current(|baseline| {
                let status = baseline.as_ref().map(|b| b.teams[0].fixture_status);
                (prepared(&["B"]), status)
            })
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Promoted);
        assert_eq!(seen, Some(FixtureStatus::Played));
        assert_eq!(keys(&second.read(Generation::Previous).unwrap()), vec!["A"]);
    }

    #[test]
    fn test_gameweek_promotion_is_explicit() {
        let store = SnapshotStore::open_in_memory().unwrap();
        assert!(!store.promote_gameweek().unwrap());

        store.publish(&snap(&["A"], FixtureStatus::Played), &pass(), rotate()).unwrap();
        assert!(store.read(Generation::LastGameweek).unwrap().is_none());
        assert!(store.promote_gameweek().unwrap());

        store.publish(&snap(&["B"], FixtureStatus::Played), &pass(), rotate()).unwrap();
        let slots = store.read_all().unwrap();
        assert_eq!(keys(&slots.last_gameweek), vec!["A"]);
        assert_eq!(keys(&slots.current), vec!["B"]);
    }

    #[test]
    fn test_cycle_log_round_trip() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let report = MergeReport {
            entries: vec![crate::sync::merge::MergeEntry {
                team_key: "A".into(),
                resolution: Resolution::FallbackToPrevious,
                reason: Some("timed out: slow".into()),
                failure_kind: Some(crate::fetch::FailureKind::Timeout),
            }],
        };
        let cycle = CycleRecord::new(Utc::now(), "SkippedRotationGuard", &report, &pass());
        store.record_cycle(&cycle).unwrap();

        let cycles = store.list_cycles(5).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].fallback, 1);
        assert_eq!(cycles[0].report, report);
    }
}
