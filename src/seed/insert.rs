//! Insert executor: batched, idempotent writes with per-row outcomes.

use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::repository::{find_existing_businesses, insert_business};
use crate::db::DatabaseError;
use crate::models::{ExistingBusiness, NewBusiness};

use super::duplicate::DuplicateProbe;
use super::types::{RowStatus, Severity, ValidatedRow};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Rejection reason for rows the chosen mode leaves out.
pub const EXCLUDED_BY_MODE: &str = "excluded_by_mode";

/// Rejection reason for rows cut off by a sink failure.
pub const ABORTED: &str = "aborted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Clean rows only.
    #[default]
    ValidOnly,
    /// Clean rows and rows with warnings.
    All,
}

impl InsertMode {
    pub fn admits(&self, status: RowStatus) -> bool {
        match self {
            Self::ValidOnly => status == RowStatus::Ok,
            Self::All => status != RowStatus::Error,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════

/// Per-listing result of one sink write.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOutcome {
    Inserted,
    SkippedDuplicate,
    Rejected(String),
}

/// Sink failures that are not attributable to a single row.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sink unreachable: {0}")]
    Network(String),

    #[error("Sink rejected the credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Sink returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Sink response unreadable: {0}")]
    Parse(String),

    /// Failed partway through a batch; `outcomes` covers the leading rows
    /// that were written before `source` stopped it.
    #[error("{source}")]
    Partial {
        outcomes: Vec<SinkOutcome>,
        source: Box<SinkError>,
    },
}

/// Destination store for seeded listings.
pub trait BusinessSink {
    fn name(&self) -> &'static str;

    /// Stored records matching any probe by slug or by name.
    fn find_existing(&self, probes: &[DuplicateProbe]) -> Result<Vec<ExistingBusiness>, SinkError>;

    /// Write one batch; outcomes line up with `batch`.
    fn insert_batch(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, SinkError>;
}

/// Local SQLite store.
pub struct SqliteSink<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSink<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Whole batch in one transaction; any failure rolls all of it back.
    fn insert_all(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for business in batch {
            outcomes.push(match insert_business(&tx, business)? {
                Some(_) => SinkOutcome::Inserted,
                None => SinkOutcome::SkippedDuplicate,
            });
        }
        tx.commit()?;
        Ok(outcomes)
    }

    /// One savepoint per row so a bad row cannot take its neighbours down.
    fn insert_each(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, SinkError> {
        let mut tx = self.conn.unchecked_transaction().map_err(DatabaseError::from)?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for business in batch {
            let sp = tx.savepoint().map_err(DatabaseError::from)?;
            match insert_business(&sp, business) {
                Ok(id) => {
                    sp.commit().map_err(DatabaseError::from)?;
                    outcomes.push(match id {
                        Some(_) => SinkOutcome::Inserted,
                        None => SinkOutcome::SkippedDuplicate,
                    });
                }
                Err(e) if is_row_error(&e) => {
                    // dropping the savepoint rolls it back
                    drop(sp);
                    tracing::debug!(slug = %business.slug, error = %e, "Row rejected by database");
                    outcomes.push(SinkOutcome::Rejected(e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().map_err(DatabaseError::from)?;
        Ok(outcomes)
    }
}

/// Errors caused by the row's own data, as opposed to the database being unusable.
fn is_row_error(err: &DatabaseError) -> bool {
    match err {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == ErrorCode::ConstraintViolation
        }
        DatabaseError::Serialization(_) | DatabaseError::ConstraintViolation(_) => true,
        _ => false,
    }
}

impl BusinessSink for SqliteSink<'_> {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn find_existing(&self, probes: &[DuplicateProbe]) -> Result<Vec<ExistingBusiness>, SinkError> {
        let slugs: Vec<String> = probes.iter().map(|p| p.slug.clone()).collect();
        let keys: Vec<String> = probes.iter().map(|p| p.identity_key.clone()).collect();
        Ok(find_existing_businesses(self.conn, &slugs, &keys)?)
    }

    fn insert_batch(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, SinkError> {
        match self.insert_all(batch) {
            Ok(outcomes) => Ok(outcomes),
            Err(e) if is_row_error(&e) => {
                tracing::warn!(
                    error = %e,
                    batch_size = batch.len(),
                    "Batch insert failed; retrying row by row"
                );
                self.insert_each(batch)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Executor
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertStatus {
    Inserted,
    SkippedDuplicate,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    pub index: usize,
    pub line: Option<u64>,
    pub slug: Option<String>,
    pub status: InsertStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertReport {
    pub mode: InsertMode,
    pub sink: String,
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub batches: usize,
    /// Set when a sink failure stopped the run; earlier batches stay committed.
    pub aborted: Option<String>,
    pub outcomes: Vec<RowOutcome>,
}

impl InsertReport {
    fn tally(&mut self) {
        self.inserted = self.count(InsertStatus::Inserted);
        self.skipped = self.count(InsertStatus::SkippedDuplicate);
        self.rejected = self.count(InsertStatus::Rejected);
    }

    fn count(&self, status: InsertStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

fn outcome(row: &ValidatedRow, status: InsertStatus, reason: Option<String>) -> RowOutcome {
    RowOutcome {
        index: row.index,
        line: row.line,
        slug: row.business.as_ref().map(|b| b.slug.clone()),
        status,
        reason,
    }
}

fn row_outcome(row: &ValidatedRow, sink_outcome: SinkOutcome) -> RowOutcome {
    match sink_outcome {
        SinkOutcome::Inserted => outcome(row, InsertStatus::Inserted, None),
        SinkOutcome::SkippedDuplicate => outcome(
            row,
            InsertStatus::SkippedDuplicate,
            Some("slug already stored".into()),
        ),
        SinkOutcome::Rejected(reason) => outcome(row, InsertStatus::Rejected, Some(reason)),
    }
}

fn first_error(row: &ValidatedRow) -> String {
    row.issues
        .iter()
        .find(|i| i.severity == Severity::Error)
        .map(|i| i.message.clone())
        .unwrap_or_else(|| "row has blocking errors".to_string())
}

/// Write admitted rows in batches and report one outcome per input row, in order.
pub fn execute_insert(
    rows: &[ValidatedRow],
    mode: InsertMode,
    sink: &dyn BusinessSink,
    batch_size: usize,
) -> InsertReport {
    let mut slots: Vec<Option<RowOutcome>> = vec![None; rows.len()];
    let mut pending: Vec<usize> = Vec::new();

    for (pos, row) in rows.iter().enumerate() {
        let decided = if row.status == RowStatus::Error {
            Some(outcome(row, InsertStatus::Rejected, Some(first_error(row))))
        } else if let Some(dup) = &row.duplicate_of {
            let reason = dup
                .existing_slug
                .clone()
                .or_else(|| dup.row_index.map(|i| format!("row {i}")));
            Some(outcome(row, InsertStatus::SkippedDuplicate, reason))
        } else if !mode.admits(row.status) {
            Some(outcome(row, InsertStatus::Rejected, Some(EXCLUDED_BY_MODE.into())))
        } else if row.business.is_none() {
            Some(outcome(row, InsertStatus::Rejected, Some("no insertable listing".into())))
        } else {
            None
        };
        match decided {
            Some(o) => slots[pos] = Some(o),
            None => pending.push(pos),
        }
    }

    let mut aborted: Option<String> = None;
    let mut batches = 0;

    for chunk in pending.chunks(batch_size.max(1)) {
        if aborted.is_some() {
            for &pos in chunk {
                slots[pos] = Some(outcome(&rows[pos], InsertStatus::Rejected, Some(ABORTED.into())));
            }
            continue;
        }

        let batch: Vec<NewBusiness> = chunk
            .iter()
            .filter_map(|&pos| rows[pos].business.clone())
            .collect();
        batches += 1;

        let (written, failure) = match sink.insert_batch(&batch) {
            Ok(outcomes) if outcomes.len() == batch.len() => (outcomes, None),
            Ok(outcomes) => {
                let err = SinkError::Parse(format!(
                    "sink returned {} outcomes for {} rows",
                    outcomes.len(),
                    batch.len()
                ));
                (Vec::new(), Some(err))
            }
            Err(SinkError::Partial { mut outcomes, source }) => {
                outcomes.truncate(batch.len());
                (outcomes, Some(*source))
            }
            Err(e) => (Vec::new(), Some(e)),
        };

        let written_count = written.len();
        for (&pos, sink_outcome) in chunk.iter().zip(written) {
            slots[pos] = Some(row_outcome(&rows[pos], sink_outcome));
        }

        if let Some(e) = failure {
            tracing::error!(
                sink = sink.name(),
                batch = batches,
                written = written_count,
                error = %e,
                "Insert aborted"
            );
            aborted = Some(e.to_string());
            for &pos in &chunk[written_count..] {
                slots[pos] = Some(outcome(&rows[pos], InsertStatus::Rejected, Some(ABORTED.into())));
            }
        }
    }

    let mut report = InsertReport {
        mode,
        sink: sink.name().to_string(),
        inserted: 0,
        skipped: 0,
        rejected: 0,
        batches,
        aborted,
        outcomes: slots.into_iter().flatten().collect(),
    };
    report.tally();

    tracing::info!(
        sink = sink.name(),
        inserted = report.inserted,
        skipped = report.skipped,
        rejected = report.rejected,
        batches = report.batches,
        aborted = report.aborted.is_some(),
        "Seed insert complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::db::repository::{count_businesses, get_business_by_slug};
    use crate::db::sqlite::open_memory_database;
    use crate::seed::types::{DuplicateOf, DuplicateReason, IssueCode, RowIssue};

    fn biz(slug: &str) -> NewBusiness {
        NewBusiness {
            name: format!("Biz {slug}"),
            slug: slug.into(),
            category: "cafes".into(),
            city: Some("Springfield".into()),
            ..Default::default()
        }
    }

    fn ok_row(index: usize, slug: &str) -> ValidatedRow {
        let mut row = ValidatedRow::new(index, Some(index as u64 + 1));
        row.business = Some(biz(slug));
        row
    }

    fn warning_row(index: usize, slug: &str) -> ValidatedRow {
        let mut row = ok_row(index, slug);
        row.push(RowIssue::warning("phone", IssueCode::InvalidPhone, "bad phone"));
        row
    }

    fn error_row(index: usize) -> ValidatedRow {
        let mut row = ValidatedRow::new(index, None);
        row.push(RowIssue::error("name", IssueCode::MissingName, "name is required"));
        row
    }

    /// In-memory sink that can be told to fail a given batch.
    #[derive(Default)]
    struct MemorySink {
        stored: RefCell<Vec<NewBusiness>>,
        calls: Cell<usize>,
        fail_on_call: Option<usize>,
        /// On the failing call, write this many rows before failing.
        written_before_failure: usize,
    }

    impl BusinessSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn find_existing(&self, _: &[DuplicateProbe]) -> Result<Vec<ExistingBusiness>, SinkError> {
            Ok(Vec::new())
        }

        fn insert_batch(&self, batch: &[NewBusiness]) -> Result<Vec<SinkOutcome>, SinkError> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            let failing = self.fail_on_call == Some(call);
            let batch = if failing {
                &batch[..self.written_before_failure.min(batch.len())]
            } else {
                batch
            };
            let mut stored = self.stored.borrow_mut();
            let outcomes: Vec<SinkOutcome> = batch
                .iter()
                .map(|b| {
                    if stored.iter().any(|s| s.slug == b.slug) {
                        SinkOutcome::SkippedDuplicate
                    } else {
                        stored.push(b.clone());
                        SinkOutcome::Inserted
                    }
                })
                .collect();
            if !failing {
                return Ok(outcomes);
            }
            let source = Box::new(SinkError::Network("connection refused".into()));
            if outcomes.is_empty() {
                Err(*source)
            } else {
                Err(SinkError::Partial { outcomes, source })
            }
        }
    }

    #[test]
    fn mode_admission() {
        assert!(InsertMode::ValidOnly.admits(RowStatus::Ok));
        assert!(!InsertMode::ValidOnly.admits(RowStatus::Warning));
        assert!(InsertMode::All.admits(RowStatus::Warning));
        assert!(!InsertMode::All.admits(RowStatus::Error));
    }

    #[test]
    fn mode_serde_names() {
        assert_eq!(serde_json::to_string(&InsertMode::ValidOnly).unwrap(), "\"valid_only\"");
        let mode: InsertMode = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(mode, InsertMode::All);
    }

    #[test]
    fn valid_only_excludes_warnings() {
        let sink = MemorySink::default();
        let rows = vec![ok_row(1, "a"), warning_row(2, "b"), error_row(3)];
        let report = execute_insert(&rows, InsertMode::ValidOnly, &sink, 10);

        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.outcomes[1].reason.as_deref(), Some(EXCLUDED_BY_MODE));
        assert_eq!(report.outcomes[2].reason.as_deref(), Some("name is required"));
        assert_eq!(sink.stored.borrow().len(), 1);
    }

    #[test]
    fn all_mode_includes_warnings_and_preserves_order() {
        let sink = MemorySink::default();
        let rows = vec![warning_row(1, "a"), error_row(2), ok_row(3, "c")];
        let report = execute_insert(&rows, InsertMode::All, &sink, 10);
        assert_eq!(report.inserted, 2);
        let indexes: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(report.outcomes[1].status, InsertStatus::Rejected);
    }

    #[test]
    fn flagged_duplicates_skipped_without_write() {
        let sink = MemorySink::default();
        let mut dup = warning_row(2, "a-2");
        dup.duplicate_of = Some(DuplicateOf {
            reason: DuplicateReason::InFile,
            existing_slug: None,
            row_index: Some(1),
        });
        let rows = vec![ok_row(1, "a"), dup];
        let report = execute_insert(&rows, InsertMode::ValidOnly, &sink, 10);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.outcomes[1].status, InsertStatus::SkippedDuplicate);
        assert_eq!(report.outcomes[1].reason.as_deref(), Some("row 1"));
        assert_eq!(sink.calls.get(), 1);
    }

    #[test]
    fn batches_respect_size() {
        let sink = MemorySink::default();
        let rows: Vec<_> = (1..=5).map(|i| ok_row(i, &format!("s{i}"))).collect();
        let report = execute_insert(&rows, InsertMode::All, &sink, 2);
        assert_eq!(report.batches, 3);
        assert_eq!(sink.calls.get(), 3);
        assert_eq!(report.inserted, 5);
    }

    #[test]
    fn sink_failure_aborts_remaining_batches() {
        let sink = MemorySink {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let rows: Vec<_> = (1..=6).map(|i| ok_row(i, &format!("s{i}"))).collect();
        let report = execute_insert(&rows, InsertMode::All, &sink, 2);

        assert_eq!(report.inserted, 2, "first batch stays committed");
        assert_eq!(report.rejected, 4);
        assert!(report.aborted.as_deref().unwrap().contains("connection refused"));
        assert!(report.outcomes[2..]
            .iter()
            .all(|o| o.reason.as_deref() == Some(ABORTED)));
        assert_eq!(sink.calls.get(), 2);
    }

    #[test]
    fn partial_sink_failure_keeps_written_rows() {
        let sink = MemorySink {
            fail_on_call: Some(1),
            written_before_failure: 1,
            ..Default::default()
        };
        let rows: Vec<_> = (1..=5).map(|i| ok_row(i, &format!("s{i}"))).collect();
        let report = execute_insert(&rows, InsertMode::All, &sink, 3);

        assert_eq!(report.inserted, 1);
        assert_eq!(report.outcomes[0].status, InsertStatus::Inserted);
        assert!(report.outcomes[1..]
            .iter()
            .all(|o| o.status == InsertStatus::Rejected && o.reason.as_deref() == Some(ABORTED)));
        assert_eq!(report.aborted.as_deref(), Some("Sink unreachable: connection refused"));
        assert_eq!(sink.stored.borrow().len(), 1);
        assert_eq!(sink.calls.get(), 1);
    }

    #[test]
    fn sqlite_insert_is_idempotent() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let rows = vec![ok_row(1, "a"), ok_row(2, "b")];

        let first = execute_insert(&rows, InsertMode::All, &sink, 100);
        assert_eq!(first.inserted, 2);

        let second = execute_insert(&rows, InsertMode::All, &sink, 100);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(count_businesses(&conn).unwrap(), 2);
    }

    #[test]
    fn sqlite_bad_row_isolated_by_savepoint() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let mut bad = ok_row(2, "bad");
        bad.business.as_mut().unwrap().category = "no-such-category".into();
        let rows = vec![ok_row(1, "a"), bad, ok_row(3, "c")];

        let report = execute_insert(&rows, InsertMode::All, &sink, 100);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.outcomes[1].status, InsertStatus::Rejected);
        assert!(report.outcomes[1].reason.as_deref().unwrap().contains("FOREIGN KEY"));
        assert!(report.aborted.is_none());
        assert!(get_business_by_slug(&conn, "a").unwrap().is_some());
        assert!(get_business_by_slug(&conn, "bad").unwrap().is_none());
        assert!(get_business_by_slug(&conn, "c").unwrap().is_some());
    }

    #[test]
    fn sqlite_find_existing_by_slug_and_identity() {
        let conn = open_memory_database().unwrap();
        insert_business(&conn, &biz("stored")).unwrap();
        let sink = SqliteSink::new(&conn);

        let probes = vec![
            DuplicateProbe {
                slug: "stored".into(),
                name: "x".into(),
                identity_key: "x||".into(),
            },
            DuplicateProbe {
                slug: "other".into(),
                name: "Biz stored".into(),
                identity_key: biz("stored").identity_key(),
            },
        ];
        let found = sink.find_existing(&probes).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug, "stored");
    }
}
