//! Admin seed pipeline: upload → validate → geocode → insert.
//!
//! `SeedPipeline::prepare` turns an uploaded file into a `PreparedBatch`
//! (every row classified, duplicates flagged, coordinates filled where
//! possible). `SeedPipeline::insert` writes an admitted subset through a
//! `BusinessSink` and reports one outcome per row.

pub mod duplicate;
pub mod format;
pub mod geocode;
pub mod hours;
pub mod ingest;
pub mod insert;
pub mod normalize;
pub mod rest_sink;
pub mod types;
pub mod validate;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

use duplicate::{mark_duplicates, probes, DuplicateIndex};
use format::{detect_format, UploadFormat};
use geocode::{enrich_rows, GeocodeError, GeocodeSettings, Geocoder};
use ingest::{parse_rows, IngestError, IngestLimits};
use insert::{execute_insert, BusinessSink, InsertMode, InsertReport, SinkError, DEFAULT_BATCH_SIZE};
use types::{ValidatedRow, ValidationSummary};
use validate::{validate_rows, CategoryCatalog, ValidationContext};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Geocoder error: {0}")]
    Geocode(#[from] GeocodeError),
}

/// Pipeline-wide limits and tuning.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub limits: IngestLimits,
    pub geocode: GeocodeSettings,
    pub batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            limits: IngestLimits::default(),
            geocode: GeocodeSettings::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Per-upload choices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOptions {
    pub geocode: bool,
}

/// A validated upload awaiting an insert decision.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedBatch {
    pub batch_id: Uuid,
    pub file_name: String,
    pub format: UploadFormat,
    pub created_at: DateTime<Utc>,
    pub summary: ValidationSummary,
    pub rows: Vec<ValidatedRow>,
}

/// One pipeline run bound to a local database, a sink and an optional geocoder.
///
/// The local database supplies the category catalog and the geocode cache;
/// listings go to `sink`, which may be the same database or a remote table.
pub struct SeedPipeline<'a> {
    conn: &'a Connection,
    sink: &'a dyn BusinessSink,
    geocoder: Option<&'a dyn Geocoder>,
    settings: PipelineSettings,
}

impl<'a> SeedPipeline<'a> {
    pub fn new(conn: &'a Connection, sink: &'a dyn BusinessSink, settings: PipelineSettings) -> Self {
        Self {
            conn,
            sink,
            geocoder: None,
            settings,
        }
    }

    pub fn with_geocoder(mut self, geocoder: &'a dyn Geocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn prepare(
        &self,
        file_name: &str,
        bytes: &[u8],
        opts: SeedOptions,
    ) -> Result<PreparedBatch, SeedError> {
        let batch_id = Uuid::new_v4();
        let format = detect_format(file_name, bytes);
        if !format.is_supported() {
            return Err(IngestError::UnsupportedFormat.into());
        }

        let raw = parse_rows(format, bytes, &self.settings.limits)?;
        tracing::info!(
            batch_id = %batch_id,
            file_name,
            format = format.as_str(),
            rows = raw.len(),
            "Seed file ingested"
        );

        let ctx = ValidationContext::new(CategoryCatalog::load(self.conn)?);
        let mut rows = validate_rows(&raw, &ctx);

        let existing = self.sink.find_existing(&probes(&rows))?;
        let index = DuplicateIndex::new(existing);
        let duplicates = mark_duplicates(&mut rows, &index);
        tracing::info!(
            batch_id = %batch_id,
            sink = self.sink.name(),
            existing_matches = index.len(),
            duplicates,
            "Rows validated"
        );

        let geocode_summary = match (opts.geocode, self.geocoder) {
            (true, Some(geocoder)) => Some(enrich_rows(
                &mut rows,
                geocoder,
                Some(self.conn),
                &self.settings.geocode,
            )),
            (true, None) => {
                tracing::warn!(batch_id = %batch_id, "Geocoding requested but no geocoder configured");
                None
            }
            (false, _) => None,
        };

        let summary = ValidationSummary::from_rows(&rows, geocode_summary);
        tracing::info!(
            batch_id = %batch_id,
            ok = summary.ok,
            warning = summary.warning,
            error = summary.error,
            "Seed batch prepared"
        );

        Ok(PreparedBatch {
            batch_id,
            file_name: file_name.to_string(),
            format,
            created_at: Utc::now(),
            summary,
            rows,
        })
    }

    pub fn insert(&self, batch: &PreparedBatch, mode: InsertMode) -> InsertReport {
        tracing::info!(
            batch_id = %batch.batch_id,
            mode = ?mode,
            sink = self.sink.name(),
            "Inserting seed batch"
        );
        execute_insert(&batch.rows, mode, self.sink, self.settings.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{count_businesses, get_business_by_slug, insert_business};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{CoordinatesSource, NewBusiness};
    use geocode::MockGeocoder;
    use insert::{InsertStatus, SqliteSink};
    use types::{DuplicateReason, IssueCode, RowStatus};

    const SHEET: &str = "\
Name,Category,Address,City,Lat,Lng,Phone,Status,Opening Hours
Joe's Pizza,Restaurants,12 Main St,Springfield,39.78,-89.65,(555) 123-4567,,Mon-Sat 11:00-22:00
Bean There,cafes,5 Oak Ave,Springfield,,,,,
Mystery Shop,spaceports,1 Elm St,Springfield,,,,,
Joes Pizza,restaurants,12 Main Street,Springfield,,,,,
Late Night Bar,bars,9 Pine Rd,Springfield,,,not a phone,pending,
";

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            geocode: GeocodeSettings {
                qps: 1000,
                base_backoff_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn prepare_classifies_rows() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let pipeline = SeedPipeline::new(&conn, &sink, fast_settings());

        let batch = pipeline
            .prepare("seed.csv", SHEET.as_bytes(), SeedOptions::default())
            .unwrap();

        assert_eq!(batch.format, UploadFormat::Csv);
        assert_eq!(batch.summary.total, 5);
        assert_eq!(batch.rows[0].status, RowStatus::Ok);
        assert_eq!(batch.rows[1].status, RowStatus::Ok);
        assert!(batch.rows[2].has_issue(IssueCode::UnknownCategory));
        assert_eq!(
            batch.rows[3].duplicate_of.as_ref().unwrap().reason,
            DuplicateReason::InFile
        );
        assert!(batch.rows[4].has_issue(IssueCode::InvalidPhone));
        assert_eq!(batch.summary.error, 1);
        assert_eq!(batch.summary.duplicates, 1);
        assert!(batch.summary.geocode.is_none());
    }

    #[test]
    fn prepare_flags_existing_records() {
        let conn = open_memory_database().unwrap();
        insert_business(
            &conn,
            &NewBusiness {
                name: "Bean There".into(),
                slug: "bean-there-downtown".into(),
                category: "cafes".into(),
                address: Some("5 Oak Avenue".into()),
                city: Some("Springfield".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let sink = SqliteSink::new(&conn);
        let pipeline = SeedPipeline::new(&conn, &sink, fast_settings());

        let batch = pipeline
            .prepare("seed.csv", SHEET.as_bytes(), SeedOptions::default())
            .unwrap();
        let dup = batch.rows[1].duplicate_of.as_ref().unwrap();
        assert_eq!(dup.reason, DuplicateReason::ExistingIdentity);
        assert_eq!(dup.existing_slug.as_deref(), Some("bean-there-downtown"));
    }

    #[test]
    fn prepare_geocodes_rows_without_coordinates() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let geocoder = MockGeocoder::new().with_point("5 Oak Ave, Springfield", 39.8, -89.6);
        let pipeline = SeedPipeline::new(&conn, &sink, fast_settings()).with_geocoder(&geocoder);

        let batch = pipeline
            .prepare("seed.csv", SHEET.as_bytes(), SeedOptions { geocode: true })
            .unwrap();

        let bean = batch.rows[1].business.as_ref().unwrap();
        assert_eq!(bean.coordinates_source, Some(CoordinatesSource::Geocoded));
        // error rows and duplicates are never sent
        let summary = batch.summary.geocode.as_ref().unwrap();
        assert_eq!(summary.requested, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.not_found, 1);
        assert!(batch.rows[4].has_issue(IssueCode::GeocodeNotFound));
    }

    #[test]
    fn insert_writes_admitted_rows_once() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let pipeline = SeedPipeline::new(&conn, &sink, fast_settings());
        let batch = pipeline
            .prepare("seed.csv", SHEET.as_bytes(), SeedOptions::default())
            .unwrap();

        let report = pipeline.insert(&batch, InsertMode::ValidOnly);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.outcomes[4].status, InsertStatus::Rejected);
        assert_eq!(count_businesses(&conn).unwrap(), 2);

        let joe = get_business_by_slug(&conn, "joes-pizza-springfield").unwrap().unwrap();
        assert_eq!(joe.phone.as_deref(), Some("5551234567"));
        assert!(joe.hours.is_some());

        let again = pipeline.insert(&batch, InsertMode::All);
        assert_eq!(again.inserted, 1, "only the warning row is new");
        assert_eq!(count_businesses(&conn).unwrap(), 3);
    }

    #[test]
    fn unsupported_and_empty_files_fail() {
        let conn = open_memory_database().unwrap();
        let sink = SqliteSink::new(&conn);
        let pipeline = SeedPipeline::new(&conn, &sink, fast_settings());

        let err = pipeline
            .prepare("seed.xlsx", b"PK\x03\x04....", SeedOptions::default())
            .unwrap_err();
        assert!(matches!(err, SeedError::Ingest(IngestError::UnsupportedFormat)));

        let err = pipeline
            .prepare("seed.csv", b"name,category\n", SeedOptions::default())
            .unwrap_err();
        assert!(matches!(err, SeedError::Ingest(IngestError::Empty)));
    }
}
